//! Process-wide connectivity status
//!
//! [`ConnectivityMonitor`] folds the platform signal (change notifications
//! plus a fallback poll) into a single `online` flag. Subscribers hear about
//! a status only when `online` flips; `last_checked` and the connection type
//! are refreshed silently on every observation.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::network::{NetworkInfo, NetworkMonitor, NetworkType};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::config::NetworkSettings;
use core_runtime::events::{CoreEvent, EventBus, Listeners, NetworkEvent, Subscription};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of connectivity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetStatus {
    pub online: bool,
    pub last_checked: DateTime<Utc>,
    pub connection_type: Option<NetworkType>,
}

/// Construction options for [`ConnectivityMonitor`]
#[derive(Clone)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    /// Transport for [`ConnectivityMonitor::test_connectivity`]
    pub http_client: Option<Arc<dyn HttpClient>>,
    /// Receives `CoreEvent::Network` on every flip
    pub event_bus: Option<EventBus>,
    pub clock: Arc<dyn Clock>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: NetworkSettings::default().poll_interval,
            http_client: None,
            event_bus: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl From<&NetworkSettings> for MonitorOptions {
    fn from(settings: &NetworkSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            ..Self::default()
        }
    }
}

struct MonitorInner {
    platform: Arc<dyn NetworkMonitor>,
    http_client: Option<Arc<dyn HttpClient>>,
    event_bus: Option<EventBus>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<NetStatus>,
    listeners: Listeners<NetStatus>,
    shutdown: CancellationToken,
}

impl MonitorInner {
    fn apply(&self, info: NetworkInfo) {
        let now = self.clock.now();
        let mut flipped = None;

        self.status.send_if_modified(|status| {
            status.last_checked = now;
            // Indeterminate keeps the last known value
            let Some(online) = info.is_online() else {
                return false;
            };
            status.connection_type = info.network_type;
            if status.online == online {
                return false;
            }
            status.online = online;
            flipped = Some(status.clone());
            true
        });

        let Some(status) = flipped else {
            return;
        };

        info!(
            online = status.online,
            connection_type = status.connection_type.map(|t| t.as_str()),
            "Connectivity changed"
        );
        self.listeners.notify(&status);

        if let Some(bus) = &self.event_bus {
            let event = if status.online {
                NetworkEvent::Online {
                    connection_type: status.connection_type.map(|t| t.as_str().to_string()),
                }
            } else {
                NetworkEvent::Offline
            };
            bus.emit(CoreEvent::Network(event)).ok();
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Shared connectivity status for the whole process.
///
/// Construct one with [`ConnectivityMonitor::start`] at the application root
/// and pass it by `Arc` to every consumer.
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    /// Captures the current platform signal and starts listening.
    ///
    /// Spawns the change listener and the poll loop on the current Tokio
    /// runtime. Both stop on [`cleanup`](Self::cleanup) or when the monitor
    /// is dropped.
    pub async fn start(platform: Arc<dyn NetworkMonitor>, options: MonitorOptions) -> Self {
        let initial = match platform.get_network_info().await {
            Ok(info) => info.is_online().map(|online| (online, info.network_type)),
            Err(e) => {
                warn!(error = %e, "Could not read platform network state; assuming online");
                None
            }
        };
        let (online, connection_type) = initial.unwrap_or((true, None));

        let (status, _) = watch::channel(NetStatus {
            online,
            last_checked: options.clock.now(),
            connection_type,
        });

        let inner = Arc::new(MonitorInner {
            platform,
            http_client: options.http_client,
            event_bus: options.event_bus,
            clock: options.clock,
            status,
            listeners: Listeners::new(),
            shutdown: CancellationToken::new(),
        });

        spawn_change_listener(Arc::downgrade(&inner), inner.shutdown.clone());
        spawn_poller(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            options.poll_interval,
        );

        debug!(online, "Connectivity monitor started");
        Self { inner }
    }

    pub fn status(&self) -> NetStatus {
        self.inner.status.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.status.borrow().online
    }

    /// Registers `callback` for `online` flips and calls it once right away
    /// with the current status.
    pub fn on_net_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NetStatus) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe_with_current(&self.status(), callback)
    }

    /// Feeds a platform observation into the monitor.
    pub fn report(&self, info: NetworkInfo) {
        self.inner.apply(info);
    }

    /// Resolves once online (immediately if already), or on cleanup.
    pub async fn wait_for_online(&self) {
        self.wait_for(true).await;
    }

    /// Resolves once offline (immediately if already), or on cleanup.
    pub async fn wait_for_offline(&self) {
        self.wait_for(false).await;
    }

    async fn wait_for(&self, online: bool) {
        let mut rx = self.inner.status.subscribe();
        tokio::select! {
            _ = rx.wait_for(|status| status.online == online) => {}
            _ = self.inner.shutdown.cancelled() => {}
        }
    }

    /// Best-effort reachability probe. Any HTTP response counts as
    /// reachable; every failure reads as `false`.
    pub async fn test_connectivity(&self, probe_url: &str) -> bool {
        let Some(http) = &self.inner.http_client else {
            debug!("No HTTP client for connectivity probe");
            return false;
        };

        let request = HttpRequest::new(HttpMethod::Head, probe_url).timeout(PROBE_TIMEOUT);
        match http.execute(request).await {
            Ok(response) => {
                debug!(status = response.status, "Connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    /// Stops the platform listener and the poll loop and drops every
    /// subscriber.
    pub fn cleanup(&self) {
        self.inner.shutdown.cancel();
        self.inner.listeners.clear();
        debug!("Connectivity monitor stopped");
    }
}

fn spawn_change_listener(inner: Weak<MonitorInner>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let Some(platform) = inner.upgrade().map(|i| Arc::clone(&i.platform)) else {
            return;
        };
        let mut changes = match platform.subscribe_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Platform change notifications unavailable; polling only");
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = changes.next() => {
                    let Some(info) = next else { break };
                    let Some(inner) = inner.upgrade() else { break };
                    inner.apply(info);
                }
            }
        }
    });
}

fn spawn_poller(inner: Weak<MonitorInner>, shutdown: CancellationToken, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    match inner.platform.get_network_info().await {
                        Ok(info) => inner.apply(info),
                        Err(e) => debug!(error = %e, "Network poll failed"),
                    }
                }
            }
        }
    });
}
