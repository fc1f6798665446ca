//! Catalog & outbox persistence over a [`KeyValueStore`]

use crate::error::{CatalogError, Result};
use crate::models::{DatasetMeta, NewDataset, NewOutboxItem, OutboxItem, OutboxOp};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::{KeyValueStore, KeyValueTransaction};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

enum Write {
    Set(String, String),
    Delete(String),
}

/// Durable catalog and outbox
///
/// Reads go straight to storage. Writes are serialized through one async
/// lock and always start from the latest persisted value, so concurrent
/// enqueue and drain paths never overwrite each other's changes.
pub struct CatalogStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    namespace: String,
    catalog_key: String,
    outbox_key: String,
    write_lock: Mutex<()>,
}

impl CatalogStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            kv,
            clock: Arc::new(SystemClock),
            catalog_key: format!("{}:catalog", namespace),
            outbox_key: format!("{}:outbox", namespace),
            namespace,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the clock used for enqueue timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn sample_key(&self, dataset_id: &str) -> String {
        format!("{}:sample:{}", self.namespace, dataset_id)
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.kv.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| CatalogError::Serialization {
                key: key.to_string(),
                source,
            }),
            None => Ok(T::default()),
        }
    }

    fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|source| CatalogError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = Self::encode(key, value)?;
        self.kv.set(key, &raw).await?;
        Ok(())
    }

    /// Applies every write in one storage transaction.
    async fn commit_writes(&self, writes: Vec<Write>) -> Result<()> {
        let mut tx = self.kv.begin_transaction().await?;
        if let Err(e) = apply_writes(tx.as_mut(), writes).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback after failed write also failed");
            }
            return Err(e.into());
        }
        tx.commit().await?;
        Ok(())
    }

    fn new_item(&self, new: NewOutboxItem) -> OutboxItem {
        new.into_item(Uuid::new_v4().to_string(), self.clock.now())
    }

    fn validate(meta: &DatasetMeta) -> Result<()> {
        meta.validate().map_err(|message| CatalogError::InvalidInput {
            field: "dataset".to_string(),
            message,
        })
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Loads every catalog entry; an absent record is an empty catalog.
    pub async fn load_catalog(&self) -> Result<Vec<DatasetMeta>> {
        self.read_json(&self.catalog_key).await
    }

    /// Replaces the whole catalog.
    pub async fn save_catalog(&self, catalog: &[DatasetMeta]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.catalog_key, catalog).await
    }

    pub async fn get_dataset(&self, id: &str) -> Result<Option<DatasetMeta>> {
        Ok(self.load_catalog().await?.into_iter().find(|d| d.id == id))
    }

    /// Upserts by id: replaces the entry in place, else appends.
    #[instrument(skip(self, meta), fields(dataset_id = %meta.id))]
    pub async fn add_to_catalog(&self, meta: DatasetMeta) -> Result<()> {
        Self::validate(&meta)?;
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load_catalog().await?;
        upsert(&mut catalog, meta);
        self.write_json(&self.catalog_key, &catalog).await
    }

    /// Returns whether an entry was removed.
    pub async fn remove_from_catalog(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load_catalog().await?;
        let before = catalog.len();
        catalog.retain(|d| d.id != id);
        if catalog.len() == before {
            return Ok(false);
        }
        self.write_json(&self.catalog_key, &catalog).await?;
        Ok(true)
    }

    /// Records a confirmed remote upsert. Returns the updated entry, or
    /// `None` when the dataset was removed locally in the meantime.
    pub async fn mark_synced(
        &self,
        id: &str,
        cloud_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DatasetMeta>> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load_catalog().await?;
        let Some(entry) = catalog.iter_mut().find(|d| d.id == id) else {
            debug!(dataset_id = %id, "Synced dataset no longer in catalog");
            return Ok(None);
        };
        entry.cloud_id = Some(cloud_id.to_string());
        entry.last_synced = Some(at);
        let updated = entry.clone();
        self.write_json(&self.catalog_key, &catalog).await?;
        Ok(Some(updated))
    }

    // =========================================================================
    // Samples
    // =========================================================================

    pub async fn save_sample(&self, dataset_id: &str, rows: &[Value]) -> Result<()> {
        self.write_json(&self.sample_key(dataset_id), rows).await
    }

    pub async fn load_sample(&self, dataset_id: &str) -> Result<Option<Vec<Value>>> {
        let key = self.sample_key(dataset_id);
        let rows: Option<Vec<Value>> = self.read_json(&key).await?;
        Ok(rows)
    }

    pub async fn delete_sample(&self, dataset_id: &str) -> Result<()> {
        self.kv.delete(&self.sample_key(dataset_id)).await?;
        Ok(())
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Items in enqueue order.
    pub async fn read_outbox(&self) -> Result<Vec<OutboxItem>> {
        self.read_json(&self.outbox_key).await
    }

    pub async fn outbox_len(&self) -> Result<usize> {
        Ok(self.read_outbox().await?.len())
    }

    /// Assigns an id, sets `retries = 0` and appends.
    #[instrument(skip(self, new), fields(op = %new.op.kind()))]
    pub async fn enqueue_outbox(&self, new: NewOutboxItem) -> Result<OutboxItem> {
        let item = self.new_item(new);
        let _guard = self.write_lock.lock().await;
        let mut outbox = self.read_outbox().await?;
        outbox.push(item.clone());
        self.write_json(&self.outbox_key, &outbox).await?;
        debug!(item_id = %item.id, queued = outbox.len(), "Outbox item enqueued");
        Ok(item)
    }

    pub async fn clear_outbox(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.kv.delete(&self.outbox_key).await?;
        info!("Outbox cleared");
        Ok(())
    }

    /// Returns whether the item was present.
    pub async fn remove_outbox_item(&self, item_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut outbox = self.read_outbox().await?;
        let before = outbox.len();
        outbox.retain(|item| item.id != item_id);
        if outbox.len() == before {
            return Ok(false);
        }
        self.write_json(&self.outbox_key, &outbox).await?;
        Ok(true)
    }

    /// Bumps an item's retry count, returning the new count.
    pub async fn increment_outbox_retries(&self, item_id: &str) -> Result<Option<u32>> {
        let _guard = self.write_lock.lock().await;
        let mut outbox = self.read_outbox().await?;
        let Some(item) = outbox.iter_mut().find(|item| item.id == item_id) else {
            return Ok(None);
        };
        item.retries = item.retries.saturating_add(1);
        let retries = item.retries;
        self.write_json(&self.outbox_key, &outbox).await?;
        Ok(Some(retries))
    }

    // =========================================================================
    // Atomic catalog + outbox changes
    // =========================================================================

    /// Upserts `meta`, optionally replaces its sample, and enqueues `ops`
    /// in a single transaction.
    #[instrument(skip(self, meta, sample, ops), fields(dataset_id = %meta.id))]
    pub async fn commit_dataset(
        &self,
        meta: DatasetMeta,
        sample: Option<&[Value]>,
        ops: Vec<NewOutboxItem>,
    ) -> Result<Vec<OutboxItem>> {
        Self::validate(&meta)?;
        let _guard = self.write_lock.lock().await;
        let catalog = self.load_catalog().await?;
        self.write_dataset(catalog, meta, sample, ops).await
    }

    /// Replaces the scanned metadata of `dataset_id` and enqueues its upload
    /// (plus the sample, when given) in a single transaction.
    ///
    /// The remote identity (`cloud_id`, `last_synced`) is taken from the
    /// entry persisted at commit time. `None` when the dataset is not in the
    /// catalog.
    #[instrument(skip(self, scan, sample))]
    pub async fn commit_rescan(
        &self,
        dataset_id: &str,
        scan: NewDataset,
        sample: Option<&[Value]>,
    ) -> Result<Option<(DatasetMeta, Vec<OutboxItem>)>> {
        let _guard = self.write_lock.lock().await;
        let catalog = self.load_catalog().await?;
        let Some(existing) = catalog.iter().find(|d| d.id == dataset_id) else {
            return Ok(None);
        };

        let mut meta = scan.into_meta(existing.id.clone());
        meta.cloud_id = existing.cloud_id.clone();
        meta.last_synced = existing.last_synced;
        Self::validate(&meta)?;

        let mut ops = vec![NewOutboxItem::upsert_dataset(meta.clone())];
        if let Some(rows) = sample {
            ops.push(NewOutboxItem::upsert_sample(meta.id.clone(), rows.to_vec()));
        }
        let items = self
            .write_dataset(catalog, meta.clone(), sample, ops)
            .await?;
        Ok(Some((meta, items)))
    }

    /// Caller holds `write_lock`; `catalog` is the latest persisted value.
    async fn write_dataset(
        &self,
        mut catalog: Vec<DatasetMeta>,
        meta: DatasetMeta,
        sample: Option<&[Value]>,
        ops: Vec<NewOutboxItem>,
    ) -> Result<Vec<OutboxItem>> {
        let sample_key = self.sample_key(&meta.id);
        let items: Vec<OutboxItem> = ops.into_iter().map(|op| self.new_item(op)).collect();
        let mut outbox = self.read_outbox().await?;

        upsert(&mut catalog, meta);
        outbox.extend(items.iter().cloned());

        let mut writes = vec![
            Write::Set(
                self.catalog_key.clone(),
                Self::encode(&self.catalog_key, &catalog)?,
            ),
            Write::Set(
                self.outbox_key.clone(),
                Self::encode(&self.outbox_key, &outbox)?,
            ),
        ];
        if let Some(rows) = sample {
            writes.push(Write::Set(sample_key.clone(), Self::encode(&sample_key, rows)?));
        }

        self.commit_writes(writes).await?;
        debug!(enqueued = items.len(), "Dataset committed");
        Ok(items)
    }

    /// Removes a dataset and its sample and enqueues its remote deletion in
    /// a single transaction. `None` when the dataset is not in the catalog.
    #[instrument(skip(self))]
    pub async fn commit_removal(
        &self,
        dataset_id: &str,
    ) -> Result<Option<(DatasetMeta, OutboxItem)>> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load_catalog().await?;
        let Some(pos) = catalog.iter().position(|d| d.id == dataset_id) else {
            return Ok(None);
        };
        let removed = catalog.remove(pos);

        let item = self.new_item(NewOutboxItem::new(OutboxOp::DeleteDataset {
            dataset_id: removed.id.clone(),
            cloud_id: removed.cloud_id.clone(),
        }));
        let mut outbox = self.read_outbox().await?;
        outbox.push(item.clone());

        self.commit_writes(vec![
            Write::Set(
                self.catalog_key.clone(),
                Self::encode(&self.catalog_key, &catalog)?,
            ),
            Write::Delete(self.sample_key(dataset_id)),
            Write::Set(
                self.outbox_key.clone(),
                Self::encode(&self.outbox_key, &outbox)?,
            ),
        ])
        .await?;

        Ok(Some((removed, item)))
    }
}

fn upsert(catalog: &mut Vec<DatasetMeta>, meta: DatasetMeta) {
    match catalog.iter_mut().find(|d| d.id == meta.id) {
        Some(existing) => *existing = meta,
        None => catalog.push(meta),
    }
}

async fn apply_writes(
    tx: &mut dyn KeyValueTransaction,
    writes: Vec<Write>,
) -> bridge_traits::error::Result<()> {
    for write in writes {
        match write {
            Write::Set(key, value) => tx.set(&key, &value).await?,
            Write::Delete(key) => tx.delete(&key).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSchema, DatasetSource, NewDataset};
    use bridge_desktop::SqliteKeyValueStore;
    use serde_json::json;
    use std::collections::HashSet;

    async fn store() -> CatalogStore {
        let kv = SqliteKeyValueStore::in_memory().await.unwrap();
        CatalogStore::new(Arc::new(kv), "test")
    }

    fn dataset(id: &str, name: &str) -> DatasetMeta {
        NewDataset::new(name, DatasetSource::LocalFile)
            .with_schema(vec![ColumnSchema::new("amount", "number")])
            .into_meta(id)
    }

    #[tokio::test]
    async fn test_empty_store_reads_empty() {
        let store = store().await;
        assert!(store.load_catalog().await.unwrap().is_empty());
        assert!(store.read_outbox().await.unwrap().is_empty());
        assert!(store.load_sample("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_to_catalog_upserts_by_id() {
        let store = store().await;
        store.add_to_catalog(dataset("d1", "First")).await.unwrap();
        store.add_to_catalog(dataset("d2", "Second")).await.unwrap();
        store.add_to_catalog(dataset("d1", "Renamed")).await.unwrap();

        let catalog = store.load_catalog().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].id, "d1");
        assert_eq!(catalog[0].name, "Renamed");
        assert_eq!(catalog[1].id, "d2");
    }

    #[tokio::test]
    async fn test_add_to_catalog_rejects_invalid() {
        let store = store().await;
        let err = store.add_to_catalog(dataset("d1", "")).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_remove_from_catalog() {
        let store = store().await;
        store
            .save_catalog(&[dataset("d1", "A"), dataset("d2", "B")])
            .await
            .unwrap();

        assert!(store.remove_from_catalog("d1").await.unwrap());
        assert!(!store.remove_from_catalog("d1").await.unwrap());

        let ids: Vec<_> = store
            .load_catalog()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["d2"]);
    }

    #[tokio::test]
    async fn test_enqueue_assigns_unique_ids_in_insertion_order() {
        let store = store().await;
        let mut enqueued = Vec::new();
        for i in 0..10 {
            let item = store
                .enqueue_outbox(NewOutboxItem::upsert_sample(
                    format!("d{}", i),
                    vec![json!({ "row": i })],
                ))
                .await
                .unwrap();
            enqueued.push(item.id);
        }

        let outbox = store.read_outbox().await.unwrap();
        let ids: Vec<_> = outbox.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, enqueued);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);
        assert!(outbox.iter().all(|i| i.retries == 0));
        assert_eq!(outbox[3].op.dataset_id(), Some("d3"));
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_are_not_lost() {
        let store = Arc::new(store().await);

        let tasks = (0..20).map(|i| {
            let store = Arc::clone(&store);
            async move {
                store
                    .enqueue_outbox(NewOutboxItem::delete_dataset(format!("d{}", i), None))
                    .await
                    .unwrap()
            }
        });
        let items = futures::future::join_all(tasks).await;

        let outbox = store.read_outbox().await.unwrap();
        assert_eq!(outbox.len(), 20);
        let persisted: HashSet<_> = outbox.iter().map(|i| i.id.clone()).collect();
        assert!(items.iter().all(|i| persisted.contains(&i.id)));
    }

    #[tokio::test]
    async fn test_remove_and_increment_outbox_item() {
        let store = store().await;
        let a = store
            .enqueue_outbox(NewOutboxItem::upsert_dataset(dataset("d1", "A")))
            .await
            .unwrap();
        let b = store
            .enqueue_outbox(NewOutboxItem::delete_dataset("d2", None))
            .await
            .unwrap();

        assert_eq!(store.increment_outbox_retries(&a.id).await.unwrap(), Some(1));
        assert_eq!(store.increment_outbox_retries(&a.id).await.unwrap(), Some(2));
        assert_eq!(store.increment_outbox_retries("nope").await.unwrap(), None);

        assert!(store.remove_outbox_item(&b.id).await.unwrap());
        assert!(!store.remove_outbox_item(&b.id).await.unwrap());

        let outbox = store.read_outbox().await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].id, a.id);
        assert_eq!(outbox[0].retries, 2);

        store.clear_outbox().await.unwrap();
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_synced_sets_cloud_id() {
        let store = store().await;
        store.add_to_catalog(dataset("d1", "A")).await.unwrap();
        let at = Utc::now();

        let updated = store.mark_synced("d1", "cloud-1", at).await.unwrap().unwrap();
        assert_eq!(updated.cloud_id.as_deref(), Some("cloud-1"));
        assert_eq!(updated.last_synced, Some(at));

        let reloaded = store.get_dataset("d1").await.unwrap().unwrap();
        assert!(reloaded.is_synced());

        assert!(store.mark_synced("gone", "x", at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_dataset_writes_everything() {
        let store = store().await;
        let meta = dataset("d1", "Ledger");
        let rows = vec![json!({ "amount": 100 }), json!({ "amount": -40 })];

        let items = store
            .commit_dataset(
                meta.clone(),
                Some(rows.as_slice()),
                vec![
                    NewOutboxItem::upsert_dataset(meta.clone()),
                    NewOutboxItem::upsert_sample("d1", rows.clone()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(store.get_dataset("d1").await.unwrap(), Some(meta));
        assert_eq!(store.load_sample("d1").await.unwrap(), Some(rows));

        let kinds: Vec<_> = store
            .read_outbox()
            .await
            .unwrap()
            .iter()
            .map(|i| i.op.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["UPSERT_DATASET", "UPSERT_SAMPLE"]);
    }

    #[tokio::test]
    async fn test_commit_rescan_keeps_remote_identity() {
        let store = Arc::new(store().await);
        store
            .commit_dataset(dataset("d1", "Ledger"), None, vec![])
            .await
            .unwrap();
        let at = Utc::now();

        // Whichever lands first, the synced identity survives the rescan.
        let rows = vec![json!({ "amount": 7 })];
        let (synced, rescanned) = tokio::join!(
            store.mark_synced("d1", "cloud-1", at),
            store.commit_rescan(
                "d1",
                NewDataset::new("Ledger v2", DatasetSource::LocalFile),
                Some(rows.as_slice()),
            ),
        );
        assert!(synced.unwrap().is_some());
        let (meta, items) = rescanned.unwrap().unwrap();
        assert_eq!(meta.id, "d1");
        assert_eq!(items.len(), 2);

        let persisted = store.get_dataset("d1").await.unwrap().unwrap();
        assert_eq!(persisted.name, "Ledger v2");
        assert_eq!(persisted.cloud_id.as_deref(), Some("cloud-1"));
        assert_eq!(persisted.last_synced, Some(at));
        assert_eq!(store.load_sample("d1").await.unwrap(), Some(rows));

        let missing = store
            .commit_rescan("gone", NewDataset::new("X", DatasetSource::LocalFile), None)
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(store.outbox_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_commit_removal_enqueues_delete_with_cloud_id() {
        let store = store().await;
        let meta = dataset("d1", "Ledger");
        store
            .commit_dataset(meta, Some(&[json!({ "a": 1 })][..]), vec![])
            .await
            .unwrap();
        store.mark_synced("d1", "cloud-1", Utc::now()).await.unwrap();

        let (removed, item) = store.commit_removal("d1").await.unwrap().unwrap();
        assert_eq!(removed.id, "d1");
        assert_eq!(
            item.op,
            OutboxOp::DeleteDataset {
                dataset_id: "d1".to_string(),
                cloud_id: Some("cloud-1".to_string()),
            }
        );

        assert!(store.load_catalog().await.unwrap().is_empty());
        assert!(store.load_sample("d1").await.unwrap().is_none());
        assert_eq!(store.outbox_len().await.unwrap(), 1);

        assert!(store.commit_removal("d1").await.unwrap().is_none());
        assert_eq!(store.outbox_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sample_save_and_delete() {
        let store = store().await;
        let rows = vec![json!({"unit": "3C", "rent": 1390})];

        store.save_sample("d1", &rows).await.unwrap();
        assert_eq!(store.load_sample("d1").await.unwrap(), Some(rows));

        store.delete_sample("d1").await.unwrap();
        assert!(store.load_sample("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let a = CatalogStore::new(Arc::clone(&kv), "a");
        let b = CatalogStore::new(kv, "b");

        a.add_to_catalog(dataset("d1", "A")).await.unwrap();
        assert!(b.load_catalog().await.unwrap().is_empty());
        assert_eq!(a.namespace(), "a");
    }

    #[tokio::test]
    async fn test_corrupt_record_is_serialization_error() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        kv.set("test:outbox", "{not json").await.unwrap();
        let store = CatalogStore::new(kv, "test");

        let err = store.read_outbox().await.unwrap_err();
        assert!(matches!(err, CatalogError::Serialization { ref key, .. } if key == "test:outbox"));
    }
}
