//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tracing::debug;

const DEFAULT_REACHABILITY_ADDR: &str = "1.1.1.1:53";
const DEFAULT_CHANGE_POLL: Duration = Duration::from_secs(5);

/// Desktop network monitor implementation
///
/// Desktop has no portable online/offline event, so connectivity is derived
/// from a TCP reachability check and transitions are found by polling.
#[derive(Debug, Clone)]
pub struct DesktopNetworkMonitor {
    reachability_addr: String,
    probe_timeout: Duration,
    change_poll: Duration,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self {
            reachability_addr: DEFAULT_REACHABILITY_ADDR.to_string(),
            probe_timeout: Duration::from_secs(3),
            change_poll: DEFAULT_CHANGE_POLL,
        }
    }

    /// Use a different `host:port` for the reachability check
    pub fn with_reachability_addr(mut self, addr: impl Into<String>) -> Self {
        self.reachability_addr = addr.into();
        self
    }

    /// How often the change stream re-checks reachability
    pub fn with_change_poll(mut self, interval: Duration) -> Self {
        self.change_poll = interval;
        self
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.probe_timeout,
            tokio::net::TcpStream::connect(&self.reachability_addr),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;
        debug!(status = ?status, addr = %self.reachability_addr, "Network info updated");

        Ok(NetworkInfo {
            status,
            // Reachability alone cannot tell WiFi from Ethernet
            network_type: (status == NetworkStatus::Connected).then_some(NetworkType::Other),
        })
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Network change stream that polls for changes
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            tokio::time::sleep(self.monitor.change_poll).await;

            if let Ok(info) = self.monitor.get_network_info().await {
                if self.last_status != Some(info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}
