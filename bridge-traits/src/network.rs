//! Network Monitoring Abstraction
//!
//! Provides the raw platform connectivity signal. The sync core turns this
//! into a single debounced online/offline status; hosts only have to report
//! what the operating system (or browser) tells them.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Cellular/mobile data connection
    Cellular,
    /// WiFi connection
    WiFi,
    /// Ethernet connection
    Ethernet,
    /// Other or unknown connection type
    Other,
}

impl NetworkType {
    /// Short label used in status snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cellular => "cellular",
            Self::WiFi => "wifi",
            Self::Ethernet => "ethernet",
            Self::Other => "other",
        }
    }
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
}

impl NetworkInfo {
    pub fn connected(network_type: Option<NetworkType>) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
        }
    }

    /// `Some(true/false)` for a definite signal, `None` when indeterminate
    pub fn is_online(&self) -> Option<bool> {
        match self.status {
            NetworkStatus::Connected => Some(true),
            NetworkStatus::Disconnected => Some(false),
            NetworkStatus::Indeterminate => None,
        }
    }
}

/// Network monitor trait
///
/// Provides platform connectivity information so the core can:
/// - Skip remote delivery while offline
/// - Drain the outbox as soon as connectivity returns
///
/// # Platform Support
///
/// - **Desktop**: Reachability checks or system network APIs
/// - **Mobile**: ConnectivityManager / Network framework
/// - **Web**: `navigator.onLine` plus `online`/`offline` window events
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Subscribe to network status changes
    ///
    /// Returns a stream of network info updates. Implementations should
    /// emit an event whenever the platform reports a transition.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_info() {
        let info = NetworkInfo::connected(Some(NetworkType::WiFi));

        assert_eq!(info.status, NetworkStatus::Connected);
        assert_eq!(info.network_type.map(|t| t.as_str()), Some("wifi"));
        assert_eq!(info.is_online(), Some(true));
    }

    #[test]
    fn test_indeterminate_has_no_online_signal() {
        let info = NetworkInfo {
            status: NetworkStatus::Indeterminate,
            network_type: None,
        };
        assert_eq!(info.is_online(), None);
        assert_eq!(NetworkInfo::disconnected().is_online(), Some(false));
    }
}
