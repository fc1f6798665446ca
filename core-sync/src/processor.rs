//! # Sync Processor
//!
//! Drains the outbox against a [`RemoteStore`].
//!
//! ## Pass
//!
//! 1. Skip without touching the outbox unless the remote is configured and
//!    the session is authenticated.
//! 2. Read the outbox and deliver every item in FIFO order.
//! 3. Delivered items are removed. Failures are classified: retryable
//!    failures within the retry budget stay queued with `retries + 1`,
//!    everything else is removed and reported in [`SyncResult::errors`].
//!
//! A single item's failure never aborts a pass. Storage failures do.
//!
//! ## Backoff
//!
//! [`SyncProcessor::process_outbox_with_backoff`] repeats passes while items
//! remain retryable, sleeping through the injected [`Timer`] with delays
//! from a [`Backoff`] state machine.

use crate::backoff::{Backoff, BackoffPolicy, TokioTimer};
use crate::error::{RemoteError, Result};
use crate::remote::RemoteStore;
use bridge_traits::time::{Clock, SystemClock, Timer};
use core_catalog::{CatalogStore, OutboxItem, OutboxOp};
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus, SyncEvent};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Default delivery attempts per item
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Why a pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotConfigured,
    NotAuthenticated,
    Offline,
    AlreadyInProgress,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NotConfigured => "remote not configured",
            SkipReason::NotAuthenticated => "not authenticated",
            SkipReason::Offline => "offline",
            SkipReason::AlreadyInProgress => "sync already in progress",
        };
        f.write_str(reason)
    }
}

/// An item removed from the outbox without being delivered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub item: OutboxItem,
    pub error: RemoteError,
}

/// Outcome of one or more outbox passes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncResult {
    pub success: bool,
    pub processed: usize,
    pub errors: Vec<FailedItem>,
    /// Items still queued after a transient failure
    pub retryable: Vec<OutboxItem>,
    pub skipped: Option<SkipReason>,
}

impl SyncResult {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            success: false,
            skipped: Some(reason),
            ..Self::default()
        }
    }

    fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Folds a later pass into this one.
    fn absorb(&mut self, pass: SyncResult) {
        self.processed += pass.processed;
        self.errors.extend(pass.errors);
        if pass.skipped.is_some() {
            self.skipped = pass.skipped;
        } else {
            self.retryable = pass.retryable;
        }
        self.success = self.errors.is_empty() && self.skipped.is_none();
    }
}

enum Delivered {
    Done,
    Synced { dataset_id: String, cloud_id: String },
}

/// Outbox drainer
pub struct SyncProcessor {
    store: Arc<CatalogStore>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    max_retries: u32,
    event_bus: Option<EventBus>,
}

impl SyncProcessor {
    pub fn new(store: Arc<CatalogStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            remote,
            clock: Arc::new(SystemClock),
            timer: Arc::new(TokioTimer),
            max_retries: DEFAULT_MAX_RETRIES,
            event_bus: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Delivery attempts per item before a retryable failure becomes
    /// permanent. Values below 1 are treated as 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    /// Runs a single pass over the outbox.
    #[instrument(skip(self))]
    pub async fn process_outbox(&self) -> Result<SyncResult> {
        if !self.remote.is_configured() {
            debug!("Remote not configured; skipping outbox pass");
            return Ok(SyncResult::skipped(SkipReason::NotConfigured));
        }
        if !self.remote.is_authenticated().await {
            debug!("Not authenticated; skipping outbox pass");
            return Ok(SyncResult::skipped(SkipReason::NotAuthenticated));
        }

        let items = self.store.read_outbox().await?;
        if items.is_empty() {
            return Ok(SyncResult::empty());
        }

        debug!(pending = items.len(), "Processing outbox");
        let mut result = SyncResult::default();

        for item in items {
            match self.dispatch(&item).await {
                Ok(delivered) => {
                    if let Delivered::Synced {
                        dataset_id,
                        cloud_id,
                    } = delivered
                    {
                        self.record_synced(&dataset_id, &cloud_id).await?;
                    }
                    self.store.remove_outbox_item(&item.id).await?;
                    result.processed += 1;
                }
                Err(error) => self.handle_failure(item, error, &mut result).await?,
            }
        }

        result.success = result.errors.is_empty();
        info!(
            processed = result.processed,
            failed = result.errors.len(),
            retryable = result.retryable.len(),
            "Outbox pass finished"
        );
        Ok(result)
    }

    /// Repeats passes while items remain retryable.
    ///
    /// Stops when nothing is retryable, when a pass is skipped, or when the
    /// backoff is exhausted. The returned result sums `processed` and
    /// concatenates `errors` across passes; `retryable` is what the last
    /// pass left behind.
    #[instrument(skip(self, policy))]
    pub async fn process_outbox_with_backoff(&self, policy: BackoffPolicy) -> Result<SyncResult> {
        let mut backoff = Backoff::new(policy);
        let mut total = self.process_outbox().await?;

        while !total.retryable.is_empty() && total.skipped.is_none() {
            let Some(delay) = backoff.next_delay() else {
                warn!(
                    retryable = total.retryable.len(),
                    "Backoff exhausted; leaving items queued"
                );
                break;
            };
            debug!(
                delay_ms = delay.as_millis() as u64,
                retryable = total.retryable.len(),
                "Retrying outbox after delay"
            );
            self.timer.sleep(delay).await;
            let pass = self.process_outbox().await?;
            total.absorb(pass);
        }

        Ok(total)
    }

    async fn dispatch(&self, item: &OutboxItem) -> std::result::Result<Delivered, RemoteError> {
        match &item.op {
            OutboxOp::UpsertDataset(meta) => {
                let upserted = self.remote.upsert_dataset(meta).await?;
                Ok(Delivered::Synced {
                    dataset_id: meta.id.clone(),
                    cloud_id: upserted.cloud_id,
                })
            }
            OutboxOp::UpsertSample { dataset_id, sample } => {
                self.remote.upsert_dataset_sample(dataset_id, sample).await?;
                Ok(Delivered::Done)
            }
            OutboxOp::DeleteDataset {
                dataset_id,
                cloud_id,
            } => {
                let target = cloud_id.as_deref().unwrap_or(dataset_id);
                self.remote.delete_dataset(target).await?;
                Ok(Delivered::Done)
            }
            OutboxOp::Unknown { kind, .. } => {
                warn!(item_id = %item.id, op = %kind, "Dropping unknown outbox operation");
                Ok(Delivered::Done)
            }
        }
    }

    async fn handle_failure(
        &self,
        item: OutboxItem,
        error: RemoteError,
        result: &mut SyncResult,
    ) -> Result<()> {
        let attempts = item.retries.saturating_add(1);

        if error.is_retryable() && attempts < self.max_retries {
            let retries = self
                .store
                .increment_outbox_retries(&item.id)
                .await?
                .unwrap_or(attempts);
            warn!(
                item_id = %item.id,
                op = item.op.kind(),
                retries,
                error = %error,
                "Outbox item failed; will retry"
            );
            result.retryable.push(OutboxItem { retries, ..item });
            return Ok(());
        }

        warn!(
            item_id = %item.id,
            op = item.op.kind(),
            retries = item.retries,
            error = %error,
            "Outbox item failed permanently"
        );
        self.store.remove_outbox_item(&item.id).await?;
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(SyncEvent::ItemFailed {
                item_id: item.id.clone(),
                operation: item.op.kind().to_string(),
                message: error.to_string(),
            }))
            .ok();
        }
        result.errors.push(FailedItem { item, error });
        Ok(())
    }

    async fn record_synced(&self, dataset_id: &str, cloud_id: &str) -> Result<()> {
        let updated = self
            .store
            .mark_synced(dataset_id, cloud_id, self.clock.now())
            .await?;
        if updated.is_some() {
            if let Some(bus) = &self.event_bus {
                bus.emit(CoreEvent::Catalog(CatalogEvent::DatasetSynced {
                    dataset_id: dataset_id.to_string(),
                    cloud_id: cloud_id.to_string(),
                }))
                .ok();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use crate::remote::{NullRemote, UpsertedDataset};
    use async_trait::async_trait;
    use bridge_desktop::SqliteKeyValueStore;
    use core_catalog::{DatasetMeta, DatasetSource, NewDataset, NewOutboxItem};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedRemote {
        upsert_failures: Mutex<Vec<RemoteError>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteStore for ScriptedRemote {
        fn is_configured(&self) -> bool {
            true
        }

        async fn is_authenticated(&self) -> bool {
            true
        }

        async fn upsert_dataset(
            &self,
            meta: &DatasetMeta,
        ) -> crate::error::RemoteResult<UpsertedDataset> {
            self.calls.lock().unwrap().push(format!("upsert:{}", meta.id));
            if let Some(err) = self.upsert_failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(UpsertedDataset {
                cloud_id: format!("cloud-{}", meta.id),
            })
        }

        async fn upsert_dataset_sample(
            &self,
            dataset_id: &str,
            _rows: &[Value],
        ) -> crate::error::RemoteResult<()> {
            self.calls.lock().unwrap().push(format!("sample:{dataset_id}"));
            Ok(())
        }

        async fn delete_dataset(&self, cloud_id: &str) -> crate::error::RemoteResult<()> {
            self.calls.lock().unwrap().push(format!("delete:{cloud_id}"));
            Ok(())
        }
    }

    async fn store() -> Arc<CatalogStore> {
        let kv = SqliteKeyValueStore::in_memory().await.unwrap();
        Arc::new(CatalogStore::new(Arc::new(kv), "test"))
    }

    fn meta(id: &str) -> DatasetMeta {
        NewDataset::new(format!("Dataset {id}"), DatasetSource::LocalFile).into_meta(id)
    }

    #[tokio::test]
    async fn test_null_remote_skips_without_touching_outbox() {
        let store = store().await;
        store
            .enqueue_outbox(NewOutboxItem::upsert_dataset(meta("d1")))
            .await
            .unwrap();

        let processor = SyncProcessor::new(store.clone(), Arc::new(NullRemote));
        let result = processor.process_outbox().await.unwrap();

        assert!(!result.success);
        assert_eq!(result.processed, 0);
        assert_eq!(result.skipped, Some(SkipReason::NotConfigured));
        assert_eq!(store.outbox_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_marks_dataset_synced() {
        let store = store().await;
        let items = store
            .commit_dataset(
                meta("d1"),
                None,
                vec![NewOutboxItem::upsert_dataset(meta("d1"))],
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 1);

        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let processor = SyncProcessor::new(store.clone(), Arc::new(ScriptedRemote::default()))
            .with_event_bus(bus);

        let result = processor.process_outbox().await.unwrap();
        assert!(result.success);
        assert_eq!(result.processed, 1);

        let synced = store.get_dataset("d1").await.unwrap().unwrap();
        assert_eq!(synced.cloud_id.as_deref(), Some("cloud-d1"));
        assert!(synced.last_synced.is_some());

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Catalog(CatalogEvent::DatasetSynced {
                dataset_id: "d1".to_string(),
                cloud_id: "cloud-d1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_delete_prefers_cloud_id() {
        let store = store().await;
        store
            .enqueue_outbox(NewOutboxItem::delete_dataset("d1", Some("c1".to_string())))
            .await
            .unwrap();
        store
            .enqueue_outbox(NewOutboxItem::delete_dataset("d2", None))
            .await
            .unwrap();

        let remote = Arc::new(ScriptedRemote::default());
        let processor = SyncProcessor::new(store, remote.clone());
        processor.process_outbox().await.unwrap();

        assert_eq!(
            *remote.calls.lock().unwrap(),
            vec!["delete:c1".to_string(), "delete:d2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_operation_is_dropped_as_processed() {
        let store = store().await;
        store
            .enqueue_outbox(NewOutboxItem::new(OutboxOp::Unknown {
                kind: "RENAME_DATASET".to_string(),
                payload: json!({"datasetId": "d1"}),
            }))
            .await
            .unwrap();

        let remote = Arc::new(ScriptedRemote::default());
        let processor = SyncProcessor::new(store.clone(), remote.clone());
        let result = processor.process_outbox().await.unwrap();

        assert!(result.success);
        assert_eq!(result.processed, 1);
        assert!(remote.calls.lock().unwrap().is_empty());
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_items() {
        let store = store().await;
        store
            .enqueue_outbox(NewOutboxItem::upsert_dataset(meta("d1")))
            .await
            .unwrap();
        store
            .enqueue_outbox(NewOutboxItem::upsert_sample("d1", vec![json!({"rent": 1200})]))
            .await
            .unwrap();

        let remote = Arc::new(ScriptedRemote::default());
        remote
            .upsert_failures
            .lock()
            .unwrap()
            .push(RemoteError::new(RemoteErrorKind::Client(400), "bad row"));
        let processor = SyncProcessor::new(store.clone(), remote);

        let result = processor.process_outbox().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.processed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].error.kind, RemoteErrorKind::Client(400));
        assert!(result.retryable.is_empty());
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_error_is_retried_within_budget() {
        let store = store().await;
        store
            .enqueue_outbox(NewOutboxItem::upsert_dataset(meta("d1")))
            .await
            .unwrap();

        let remote = Arc::new(ScriptedRemote::default());
        remote
            .upsert_failures
            .lock()
            .unwrap()
            .push(RemoteError::new(RemoteErrorKind::Unknown, "???"));
        let processor = SyncProcessor::new(store.clone(), remote).with_max_retries(2);

        let result = processor.process_outbox().await.unwrap();
        assert_eq!(result.retryable.len(), 1);
        assert_eq!(result.retryable[0].retries, 1);
        assert_eq!(store.read_outbox().await.unwrap()[0].retries, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retry_count_is_dropped_not_overflowed() {
        use bridge_traits::KeyValueStore;

        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let mut item = NewOutboxItem::upsert_dataset(meta("d1"))
            .into_item("i1".to_string(), chrono::Utc::now());
        item.retries = u32::MAX;
        kv.set("test:outbox", &serde_json::to_string(&vec![item]).unwrap())
            .await
            .unwrap();
        let store = Arc::new(CatalogStore::new(kv, "test"));

        let remote = Arc::new(ScriptedRemote::default());
        remote
            .upsert_failures
            .lock()
            .unwrap()
            .push(RemoteError::from_status(503, "unavailable"));
        let processor = SyncProcessor::new(store.clone(), remote);

        let result = processor.process_outbox().await.unwrap();
        assert!(result.retryable.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].item.retries, u32::MAX);
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[test]
    fn test_absorb_folds_passes() {
        let item = NewOutboxItem::upsert_dataset(meta("d1"))
            .into_item("i1".to_string(), chrono::Utc::now());
        let mut total = SyncResult {
            success: false,
            processed: 2,
            errors: vec![FailedItem {
                item: item.clone(),
                error: RemoteError::from_status(401, "nope"),
            }],
            retryable: vec![item.clone()],
            skipped: None,
        };

        total.absorb(SyncResult {
            success: true,
            processed: 1,
            ..SyncResult::default()
        });

        assert_eq!(total.processed, 3);
        assert_eq!(total.errors.len(), 1);
        assert!(total.retryable.is_empty());
        assert!(!total.success);
    }
}
