//! # Sync Manager
//!
//! Decides *when* the outbox is drained: on a fixed interval while running,
//! whenever connectivity comes back, and on demand through
//! [`SyncManager::trigger_sync`]. At most one drain runs at a time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = SyncManager::new(processor, monitor, BackoffPolicy::default());
//! let _sub = manager.on_status_change(|status| println!("{status:?}"));
//! manager.start(Duration::from_secs(30));
//! // ...
//! manager.shutdown().await;
//! ```

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::network::{ConnectivityMonitor, NetStatus};
use crate::processor::{FailedItem, SkipReason, SyncProcessor, SyncResult};
use chrono::{DateTime, Utc};
use core_catalog::{NewOutboxItem, OutboxItem};
use core_runtime::events::{CoreEvent, Listeners, Subscription, SyncEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Observable sync state
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_authenticated: bool,
    pub is_syncing: bool,
    pub is_running: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Items still queued after the last drain, including any enqueued
    /// while it ran
    pub pending_items: usize,
    /// Items dropped by drains since the last `clear_errors`
    pub errors: Vec<FailedItem>,
}

struct Schedule {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ManagerInner {
    processor: SyncProcessor,
    monitor: Arc<ConnectivityMonitor>,
    policy: BackoffPolicy,
    status: Mutex<SyncStatus>,
    listeners: Listeners<SyncStatus>,
    drain_gate: tokio::sync::Mutex<()>,
    schedule: Mutex<Option<Schedule>>,
    network_sub: Mutex<Option<Subscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ManagerInner {
    fn status(&self) -> SyncStatus {
        lock(&self.status).clone()
    }

    /// Applies `change` and notifies listeners if anything moved.
    fn update(&self, change: impl FnOnce(&mut SyncStatus)) {
        let changed = {
            let mut status = lock(&self.status);
            let before = status.clone();
            change(&mut status);
            (*status != before).then(|| status.clone())
        };
        if let Some(status) = changed {
            self.listeners.notify(&status);
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = self.processor.event_bus() {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    fn skip(&self, reason: SkipReason) -> SyncResult {
        debug!(%reason, "Sync skipped");
        self.emit(SyncEvent::Skipped {
            reason: reason.to_string(),
        });
        SyncResult::skipped(reason)
    }

    async fn trigger_sync(&self) -> Result<SyncResult> {
        let online = self.monitor.is_online();
        self.update(|s| s.is_online = online);
        if !online {
            return Ok(self.skip(SkipReason::Offline));
        }

        let remote = self.processor.remote();
        if !remote.is_configured() {
            return Ok(self.skip(SkipReason::NotConfigured));
        }
        let authenticated = remote.is_authenticated().await;
        self.update(|s| s.is_authenticated = authenticated);
        if !authenticated {
            return Ok(self.skip(SkipReason::NotAuthenticated));
        }

        let Ok(_gate) = self.drain_gate.try_lock() else {
            return Ok(self.skip(SkipReason::AlreadyInProgress));
        };

        let pending = self.processor.store().outbox_len().await?;
        self.update(|s| {
            s.is_syncing = true;
            s.pending_items = pending;
        });
        self.emit(SyncEvent::Started {
            pending_items: pending as u64,
        });

        let started = tokio::time::Instant::now();
        let outcome = self
            .processor
            .process_outbox_with_backoff(self.policy)
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Sync aborted");
                self.update(|s| s.is_syncing = false);
                self.emit(SyncEvent::Failed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let pending = match self.processor.store().outbox_len().await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Could not read outbox length after sync");
                result.retryable.len()
            }
        };
        let finished_at = self.processor.clock().now();
        self.update(|s| {
            s.is_syncing = false;
            s.pending_items = pending;
            if result.skipped.is_none() {
                s.last_sync = Some(finished_at);
            }
            s.errors.extend(result.errors.iter().cloned());
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = result.processed,
            failed = result.errors.len(),
            pending,
            duration_ms,
            "Sync finished"
        );
        self.emit(SyncEvent::Completed {
            processed: result.processed as u64,
            failed: result.errors.len() as u64,
            retryable: result.retryable.len() as u64,
            duration_ms,
        });

        Ok(result)
    }

    fn on_network_status(self: &Arc<Self>, net: &NetStatus) {
        let was_online = {
            let mut status = lock(&self.status);
            std::mem::replace(&mut status.is_online, net.online)
        };
        if was_online == net.online {
            return;
        }
        self.listeners.notify(&self.status());

        if !net.online || !self.status().is_running {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for reconnect sync");
            return;
        };
        info!("Connectivity restored; triggering sync");
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = inner.trigger_sync().await {
                warn!(error = %e, "Reconnect sync failed");
            }
        });
    }

    fn subscribe_network(self: &Arc<Self>) {
        let mut slot = lock(&self.network_sub);
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(self.monitor.on_net_status(move |net| {
            if let Some(inner) = weak.upgrade() {
                inner.on_network_status(net);
            }
        }));
    }

    /// Cancels the schedule and detaches from the monitor. Returns the
    /// schedule task so callers may await it.
    fn halt(&self) -> Option<JoinHandle<()>> {
        let schedule = lock(&self.schedule).take();
        lock(&self.network_sub).take();
        self.update(|s| s.is_running = false);

        schedule.map(|schedule| {
            schedule.cancel.cancel();
            schedule.handle
        })
    }
}

/// Schedules outbox drains
pub struct SyncManager {
    inner: Arc<ManagerInner>,
}

impl SyncManager {
    pub fn new(
        processor: SyncProcessor,
        monitor: Arc<ConnectivityMonitor>,
        policy: BackoffPolicy,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            processor,
            monitor,
            policy,
            status: Mutex::new(SyncStatus::default()),
            listeners: Listeners::new(),
            drain_gate: tokio::sync::Mutex::new(()),
            schedule: Mutex::new(None),
            network_sub: Mutex::new(None),
        });
        inner.subscribe_network();
        Self { inner }
    }

    pub fn processor(&self) -> &SyncProcessor {
        &self.inner.processor
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status()
    }

    /// Registers `callback` for status changes and calls it once right away
    /// with the current status.
    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe_with_current(&self.inner.status(), callback)
    }

    /// Starts periodic draining: one drain right away, then every
    /// `interval`. Calling `start` while running does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) {
        let mut schedule = lock(&self.inner.schedule);
        if schedule.is_some() {
            debug!("Sync manager already running");
            return;
        }

        self.inner.subscribe_network();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            Arc::downgrade(&self.inner),
            cancel.clone(),
            interval,
        ));
        *schedule = Some(Schedule { cancel, handle });
        drop(schedule);

        self.inner.update(|s| s.is_running = true);
        info!(interval_ms = interval.as_millis() as u64, "Sync manager started");
    }

    /// Stops scheduling. A drain already in flight runs to completion.
    pub fn stop(&self) {
        if self.inner.halt().is_some() {
            info!("Sync manager stopped");
        }
    }

    /// Stops scheduling and waits for the schedule task, including any
    /// drain it is running, to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.halt() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync schedule task ended abnormally");
            }
            info!("Sync manager shut down");
        }
    }

    /// Drains the outbox now.
    ///
    /// Offline, unconfigured, unauthenticated or already-draining calls
    /// return a skipped result without contacting the remote. Only storage
    /// failures produce `Err`.
    #[instrument(skip(self))]
    pub async fn trigger_sync(&self) -> Result<SyncResult> {
        self.inner.trigger_sync().await
    }

    /// Waits for connectivity, then drains.
    pub async fn wait_for_online_and_sync(&self) -> Result<SyncResult> {
        self.inner.monitor.wait_for_online().await;
        self.trigger_sync().await
    }

    /// Re-reads the outbox length into the status.
    pub async fn refresh_pending_items(&self) -> Result<usize> {
        let pending = self.inner.processor.store().outbox_len().await?;
        self.inner.update(|s| s.pending_items = pending);
        Ok(pending)
    }

    pub fn clear_errors(&self) {
        self.inner.update(|s| s.errors.clear());
    }

    /// Re-enqueues a failed item under a fresh id with `retries = 0` and
    /// drops it from `errors`. `None` when no reported failure has that id.
    pub async fn resubmit_failed(&self, item_id: &str) -> Result<Option<OutboxItem>> {
        let failed = self
            .inner
            .status()
            .errors
            .into_iter()
            .find(|f| f.item.id == item_id);
        let Some(failed) = failed else {
            return Ok(None);
        };

        let requeued = self
            .inner
            .processor
            .store()
            .enqueue_outbox(NewOutboxItem::from(failed.item))
            .await?;
        debug!(item_id, new_item_id = %requeued.id, "Failed item resubmitted");

        self.inner.update(|s| {
            s.errors.retain(|f| f.item.id != item_id);
            s.pending_items += 1;
        });
        Ok(Some(requeued))
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(schedule) = lock(&self.inner.schedule).take() {
            schedule.cancel.cancel();
        }
    }
}

async fn run_schedule(inner: Weak<ManagerInner>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if let Err(e) = inner.trigger_sync().await {
                    warn!(error = %e, "Scheduled sync failed");
                }
            }
        }
    }
    debug!("Sync schedule ended");
}
