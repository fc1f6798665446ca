//! Core service façade and bootstrap helpers.
//!
//! The application root builds one [`CoreService`] from a [`CoreConfig`] and
//! shares it. Bootstrap wires host-provided bridges (key-value storage,
//! network signal, HTTP) into the catalog store, the connectivity monitor
//! and the sync manager. Desktop apps typically enable the `desktop-shims`
//! feature, which fills any bridge the config leaves out with the adapters
//! from `bridge-desktop`.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/propdash.db")
//!     .remote_from_env()
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//! core.start().await?;
//!
//! let dataset = core
//!     .add_dataset(NewDataset::new("Rent roll", DatasetSource::LocalFile), None)
//!     .await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_catalog::{
    ColumnSchema, DatasetMeta, DatasetSource, NewDataset, NewOutboxItem, OutboxItem, OutboxOp,
};
pub use core_runtime::config::{CoreConfig, RemoteConfig};
pub use core_runtime::events::{CoreEvent, EventBus, Subscription};
pub use core_sync::{NetStatus, SkipReason, SyncResult, SyncStatus};

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{HttpClient, KeyValueStore, NetworkMonitor};
use core_catalog::CatalogStore;
use core_runtime::events::CatalogEvent;
use core_sync::{
    BackoffPolicy, ConnectivityMonitor, MonitorOptions, NullRemote, RemoteStore, RestRemote,
    SyncManager, SyncProcessor,
};
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const EVENT_BUS_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    store: Arc<CatalogStore>,
    monitor: Arc<ConnectivityMonitor>,
    sync: Arc<SyncManager>,
    rest: Option<Arc<RestRemote>>,
    event_bus: EventBus,
    sync_interval: Duration,
    probe_url: Option<String>,
}

impl CoreService {
    /// Builds every component from `config`.
    ///
    /// # Errors
    ///
    /// Fails when a required bridge is neither injected nor supplied by the
    /// `desktop-shims` feature, or when the desktop store cannot be opened.
    #[instrument(skip(config), fields(namespace = %config.namespace))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let kv = resolve_key_value_store(&config).await?;
        let platform_monitor = resolve_network_monitor(&config)?;
        let http = resolve_http_client(&config)?;

        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let store = Arc::new(CatalogStore::new(kv, config.namespace.clone()));

        let monitor = Arc::new(
            ConnectivityMonitor::start(
                platform_monitor,
                MonitorOptions {
                    poll_interval: config.network.poll_interval,
                    http_client: http.clone(),
                    event_bus: Some(event_bus.clone()),
                    ..MonitorOptions::default()
                },
            )
            .await,
        );

        let rest = match (&config.remote, &http) {
            (Some(remote_config), Some(http)) => {
                Some(Arc::new(RestRemote::new(Arc::clone(http), remote_config)))
            }
            (Some(_), None) => return Err(CoreConfig::missing_capability("HttpClient").into()),
            (None, _) => None,
        };
        let remote: Arc<dyn RemoteStore> = match &rest {
            Some(rest) => rest.clone(),
            None => {
                info!("No remote configured; outbox will accumulate locally");
                Arc::new(NullRemote)
            }
        };

        let processor = SyncProcessor::new(store.clone(), remote)
            .with_max_retries(config.sync.max_retries)
            .with_event_bus(event_bus.clone());
        let sync = Arc::new(SyncManager::new(
            processor,
            monitor.clone(),
            BackoffPolicy::from(&config.sync),
        ));
        sync.refresh_pending_items().await?;

        debug!("Core service bootstrapped");
        Ok(Self {
            store,
            monitor,
            sync,
            rest,
            event_bus,
            sync_interval: config.sync.interval,
            probe_url: config.network.probe_url,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts periodic and reconnect-triggered syncing.
    pub async fn start(&self) -> Result<()> {
        self.sync.refresh_pending_items().await?;
        self.sync.start(self.sync_interval);
        Ok(())
    }

    /// Stops scheduling new syncs. A drain in flight still completes.
    pub fn stop(&self) {
        self.sync.stop();
    }

    /// Stops syncing, waits for any drain in flight, and releases the
    /// connectivity monitor.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
        self.monitor.cleanup();
        info!("Core service shut down");
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Registers a new dataset and queues its upload.
    ///
    /// The catalog entry, the optional sample rows and the outbox operations
    /// are committed together.
    #[instrument(skip(self, dataset, sample), fields(name = %dataset.name))]
    pub async fn add_dataset(
        &self,
        dataset: NewDataset,
        sample: Option<Vec<Value>>,
    ) -> Result<DatasetMeta> {
        let meta = dataset.into_meta(Uuid::new_v4().to_string());
        self.commit(meta.clone(), sample).await?;

        info!(dataset_id = %meta.id, "Dataset added");
        self.event_bus
            .emit(CoreEvent::Catalog(CatalogEvent::DatasetAdded {
                dataset_id: meta.id.clone(),
                name: meta.name.clone(),
            }))
            .ok();
        Ok(meta)
    }

    /// Replaces the scanned metadata of an existing dataset and queues the
    /// update. The id and remote identity are kept. `None` when the dataset
    /// is not in the catalog.
    #[instrument(skip(self, scan, sample))]
    pub async fn rescan_dataset(
        &self,
        dataset_id: &str,
        scan: NewDataset,
        sample: Option<Vec<Value>>,
    ) -> Result<Option<DatasetMeta>> {
        let Some((meta, _items)) = self
            .store
            .commit_rescan(dataset_id, scan, sample.as_deref())
            .await?
        else {
            return Ok(None);
        };
        self.sync.refresh_pending_items().await?;

        info!(dataset_id, "Dataset rescanned");
        self.event_bus
            .emit(CoreEvent::Catalog(CatalogEvent::DatasetUpdated {
                dataset_id: meta.id.clone(),
            }))
            .ok();
        Ok(Some(meta))
    }

    /// Removes a dataset locally and queues its remote deletion. `None` when
    /// the dataset is not in the catalog.
    #[instrument(skip(self))]
    pub async fn remove_dataset(&self, dataset_id: &str) -> Result<Option<DatasetMeta>> {
        let Some((removed, _item)) = self.store.commit_removal(dataset_id).await? else {
            return Ok(None);
        };
        self.sync.refresh_pending_items().await?;

        info!(dataset_id, "Dataset removed");
        self.event_bus
            .emit(CoreEvent::Catalog(CatalogEvent::DatasetRemoved {
                dataset_id: removed.id.clone(),
            }))
            .ok();
        Ok(Some(removed))
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetMeta>> {
        Ok(self.store.load_catalog().await?)
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Option<DatasetMeta>> {
        Ok(self.store.get_dataset(dataset_id).await?)
    }

    /// Cached sample rows of a dataset
    pub async fn dataset_sample(&self, dataset_id: &str) -> Result<Option<Vec<Value>>> {
        Ok(self.store.load_sample(dataset_id).await?)
    }

    pub async fn pending_operations(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.store.read_outbox().await?)
    }

    async fn commit(&self, meta: DatasetMeta, sample: Option<Vec<Value>>) -> Result<()> {
        let mut ops = vec![NewOutboxItem::upsert_dataset(meta.clone())];
        if let Some(rows) = &sample {
            ops.push(NewOutboxItem::upsert_sample(meta.id.clone(), rows.clone()));
        }
        self.store
            .commit_dataset(meta, sample.as_deref(), ops)
            .await?;
        self.sync.refresh_pending_items().await?;
        Ok(())
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Drains the outbox now.
    pub async fn trigger_sync(&self) -> Result<SyncResult> {
        Ok(self.sync.trigger_sync().await?)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Registers `callback` for sync status changes, invoking it right away
    /// with the current status.
    pub fn on_sync_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.sync.on_status_change(callback)
    }

    /// Installs (or clears) the session token used for remote writes.
    ///
    /// Without a configured remote this does nothing.
    pub fn set_access_token(&self, token: Option<String>) {
        match &self.rest {
            Some(rest) => rest.set_access_token(token),
            None => debug!("Access token ignored; no remote configured"),
        }
    }

    /// Probes the configured reachability URL. `false` when none is set.
    pub async fn test_connectivity(&self) -> bool {
        match &self.probe_url {
            Some(url) => self.monitor.test_connectivity(url).await,
            None => false,
        }
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn network_monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

#[cfg(feature = "desktop-shims")]
async fn resolve_key_value_store(config: &CoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    if let Some(store) = &config.key_value_store {
        return Ok(Arc::clone(store));
    }
    let store = bridge_desktop::SqliteKeyValueStore::new(config.database_path.clone()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn resolve_key_value_store(config: &CoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    config
        .key_value_store
        .clone()
        .ok_or_else(|| CoreConfig::missing_capability("KeyValueStore").into())
}

#[cfg(feature = "desktop-shims")]
fn resolve_network_monitor(config: &CoreConfig) -> Result<Arc<dyn NetworkMonitor>> {
    if let Some(monitor) = &config.network_monitor {
        return Ok(Arc::clone(monitor));
    }
    let monitor: Arc<dyn NetworkMonitor> = Arc::new(bridge_desktop::DesktopNetworkMonitor::new());
    Ok(monitor)
}

#[cfg(not(feature = "desktop-shims"))]
fn resolve_network_monitor(config: &CoreConfig) -> Result<Arc<dyn NetworkMonitor>> {
    config
        .network_monitor
        .clone()
        .ok_or_else(|| CoreConfig::missing_capability("NetworkMonitor").into())
}

/// The HTTP client is only required when a remote is configured.
#[cfg(feature = "desktop-shims")]
fn resolve_http_client(config: &CoreConfig) -> Result<Option<Arc<dyn HttpClient>>> {
    if let Some(client) = &config.http_client {
        return Ok(Some(Arc::clone(client)));
    }
    if config.remote.is_none() && config.network.probe_url.is_none() {
        return Ok(None);
    }
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new()?);
    Ok(Some(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn resolve_http_client(config: &CoreConfig) -> Result<Option<Arc<dyn HttpClient>>> {
    Ok(config.http_client.clone())
}
