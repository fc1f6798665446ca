//! # Core Configuration Module
//!
//! Provides configuration management for the dataset sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all dependencies and settings the core needs. It
//! enforces fail-fast validation so a bad interval or an empty namespace is
//! reported before anything touches storage.
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `KeyValueStore` - Catalog and outbox persistence (desktop default: SQLite)
//! - `NetworkMonitor` - Platform connectivity signal (desktop default: TCP reachability)
//! - `HttpClient` - Remote store transport (desktop default: reqwest)
//!
//! Defaults are resolved by `core-service` when its `desktop-shims` feature is
//! enabled. Without it, a missing bridge fails with
//! [`Error::CapabilityMissing`](crate::Error::CapabilityMissing).
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteConfig};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/propdash.db")
//!     .remote(RemoteConfig::new("https://project.example.co", "anon-key"))
//!     .sync_interval(Duration::from_secs(60))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing database path
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing database path");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, KeyValueStore, NetworkMonitor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the remote store base URL
pub const REMOTE_URL_ENV: &str = "PROPDASH_REMOTE_URL";
/// Environment variable holding the remote store API key
pub const REMOTE_API_KEY_ENV: &str = "PROPDASH_REMOTE_API_KEY";

/// Storage namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "propdash";

/// Core configuration for the dataset sync core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file backing the default store
    pub database_path: PathBuf,

    /// Prefix for every persisted record (`{namespace}:catalog`, ...)
    pub namespace: String,

    /// Remote store connection; `None` selects the offline-only remote
    pub remote: Option<RemoteConfig>,

    pub sync: SyncSettings,

    pub network: NetworkSettings,

    /// Durable key-value storage (optional with desktop default)
    pub key_value_store: Option<Arc<dyn KeyValueStore>>,

    /// Platform connectivity signal (optional with desktop default)
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    /// HTTP transport for the remote store and probes (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("namespace", &self.namespace)
            .field("remote", &self.remote)
            .field("sync", &self.sync)
            .field("network", &self.network)
            .field(
                "key_value_store",
                &self
                    .key_value_store
                    .as_ref()
                    .map(|_| "KeyValueStore { ... }"),
            )
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .finish()
    }
}

/// Connection details for the remote dataset store.
///
/// # Security Note
///
/// API keys should never be hardcoded in the binary. Load them from the
/// environment ([`RemoteConfig::from_env`]) or the host's secure configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://project.example.co`
    pub endpoint: String,
    /// Public API key sent with every request
    pub api_key: String,
}

impl RemoteConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads [`REMOTE_URL_ENV`] and [`REMOTE_API_KEY_ENV`].
    ///
    /// Returns `None` unless both are set and non-empty, which leaves the
    /// core running against the offline-only remote.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(REMOTE_URL_ENV).ok()?;
        let api_key = std::env::var(REMOTE_API_KEY_ENV).ok()?;
        if endpoint.trim().is_empty() || api_key.trim().is_empty() {
            return None;
        }
        Some(Self::new(endpoint.trim(), api_key.trim()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(Error::Config(format!(
                "Remote endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.api_key.is_empty() {
            return Err(Error::Config("Remote API key cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***REDACTED***")
            .finish()
    }
}

/// Outbox drain scheduling and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Period of the recurring drain while running
    pub interval: Duration,
    /// First delay between backoff passes
    pub base_delay: Duration,
    /// Upper bound for the doubling backoff delay
    pub max_delay: Duration,
    /// Delivery attempts per outbox item before it is dropped as failed
    pub max_retries: u32,
    /// Passes allowed at `max_delay` before a drain gives up
    pub max_capped_passes: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30_000),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 3,
            max_capped_passes: 3,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config(
                "Sync interval must be greater than 0ms".to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(Error::Config(
                "Backoff base delay must be greater than 0ms".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(format!(
                "Backoff max delay ({:?}) must not be below base delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(
                "max_retries must allow at least one delivery attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connectivity monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// How often the platform signal is re-read
    pub poll_interval: Duration,
    /// Optional URL for best-effort active probes
    pub probe_url: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            probe_url: None,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path and namespace are not empty
    /// - The namespace contains no `:` (it prefixes `:`-separated keys)
    /// - Sync and network settings are consistent
    /// - A configured remote has a usable endpoint and key
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.namespace.is_empty() {
            return Err(Error::Config("Namespace cannot be empty".to_string()));
        }

        if self.namespace.contains(':') {
            return Err(Error::Config(format!(
                "Namespace '{}' must not contain ':'",
                self.namespace
            )));
        }

        self.sync.validate()?;

        if self.network.poll_interval.is_zero() {
            return Err(Error::Config(
                "Network poll interval must be greater than 0ms".to_string(),
            ));
        }

        if let Some(remote) = &self.remote {
            remote.validate()?;
        }

        Ok(())
    }

    /// Error for a bridge that is neither injected nor provided by a shim.
    pub fn missing_capability(capability: &str) -> Error {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: format!(
                "{capability} implementation is required. \
                 Desktop: enable the 'desktop-shims' feature to use the default. \
                 Other hosts: inject a platform implementation via CoreConfig::builder()."
            ),
        }
    }
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    namespace: Option<String>,
    remote: Option<RemoteConfig>,
    sync: SyncSettings,
    network: NetworkSettings,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/propdash.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the storage namespace. Default: `propdash`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Uses [`RemoteConfig::from_env`] unless a remote was already set.
    pub fn remote_from_env(mut self) -> Self {
        if self.remote.is_none() {
            self.remote = RemoteConfig::from_env();
        }
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = settings;
        self
    }

    /// Sets the recurring drain interval. Default: 30s.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync.interval = interval;
        self
    }

    /// Sets the backoff delays. Defaults: 1s base, 30s cap.
    pub fn backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.sync.base_delay = base_delay;
        self.sync.max_delay = max_delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.sync.max_retries = max_retries;
        self
    }

    pub fn network_settings(mut self, settings: NetworkSettings) -> Self {
        self.network = settings;
        self
    }

    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.network.probe_url = Some(url.into());
        self
    }

    /// Sets the key-value store implementation.
    ///
    /// If not provided, `core-service` opens an SQLite store at
    /// `database_path` when the `desktop-shims` feature is enabled.
    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the database path is missing or any
    /// setting fails [`CoreConfig::validate`].
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let config = CoreConfig {
            database_path,
            namespace: self
                .namespace
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            remote: self.remote,
            sync: self.sync,
            network: self.network,
            key_value_store: self.key_value_store,
            network_monitor: self.network_monitor,
            http_client: self.http_client,
        };

        config.validate()?;

        Ok(config)
    }
}
