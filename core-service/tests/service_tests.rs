use async_trait::async_trait;
use bridge_desktop::SqliteKeyValueStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, NetworkChangeStream, NetworkInfo,
    NetworkMonitor, NetworkType,
};
use core_service::{
    ColumnSchema, CoreConfig, CoreEvent, CoreService, DatasetSource, NewDataset, OutboxOp,
    RemoteConfig, SkipReason,
};
use core_runtime::events::CatalogEvent;
use mockall::mock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

struct AlwaysOnline;

struct NoChanges;

#[async_trait]
impl NetworkChangeStream for NoChanges {
    async fn next(&mut self) -> Option<NetworkInfo> {
        std::future::pending().await
    }
}

#[async_trait]
impl NetworkMonitor for AlwaysOnline {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(NetworkInfo::connected(Some(NetworkType::Ethernet)))
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(NoChanges))
    }
}

fn created() -> HttpResponse {
    HttpResponse {
        status: 201,
        headers: HashMap::new(),
        body: Default::default(),
    }
}

async fn config(remote: Option<Arc<dyn HttpClient>>) -> CoreConfig {
    let kv = SqliteKeyValueStore::in_memory().await.unwrap();
    let mut builder = CoreConfig::builder()
        .database_path("unused.db")
        .key_value_store(Arc::new(kv))
        .network_monitor(Arc::new(AlwaysOnline));
    if let Some(http) = remote {
        builder = builder
            .remote(RemoteConfig::new("https://db.example.co", "anon-key"))
            .http_client(http);
    }
    builder.build().unwrap()
}

fn rent_roll() -> NewDataset {
    NewDataset::new("Rent roll 2024", DatasetSource::LocalFile)
        .with_size(4_096)
        .with_schema(vec![
            ColumnSchema::new("unit", "string"),
            ColumnSchema::new("rent", "number"),
        ])
}

#[tokio::test]
async fn test_add_dataset_commits_catalog_sample_and_outbox() {
    let core = CoreService::bootstrap(config(None).await).await.unwrap();
    let mut events = core.event_bus().subscribe();

    let sample = vec![json!({"unit": "1A", "rent": 1450})];
    let meta = core
        .add_dataset(rent_roll(), Some(sample.clone()))
        .await
        .unwrap();

    assert_eq!(core.list_datasets().await.unwrap(), vec![meta.clone()]);
    assert_eq!(core.dataset_sample(&meta.id).await.unwrap(), Some(sample));

    let ops: Vec<String> = core
        .pending_operations()
        .await
        .unwrap()
        .iter()
        .map(|item| item.op.kind().to_string())
        .collect();
    assert_eq!(ops, vec!["UPSERT_DATASET", "UPSERT_SAMPLE"]);
    assert_eq!(core.sync_status().pending_items, 2);

    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Catalog(CatalogEvent::DatasetAdded {
            dataset_id: meta.id.clone(),
            name: "Rent roll 2024".to_string(),
        })
    );
}

#[tokio::test]
async fn test_without_remote_sync_is_skipped_and_queue_grows() {
    let core = CoreService::bootstrap(config(None).await).await.unwrap();
    core.add_dataset(rent_roll(), None).await.unwrap();

    let result = core.trigger_sync().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.skipped, Some(SkipReason::NotConfigured));
    assert_eq!(core.pending_operations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_dataset_queues_delete() {
    let core = CoreService::bootstrap(config(None).await).await.unwrap();
    let meta = core
        .add_dataset(rent_roll(), Some(vec![json!({"unit": "2B"})]))
        .await
        .unwrap();

    let removed = core.remove_dataset(&meta.id).await.unwrap().unwrap();
    assert_eq!(removed.id, meta.id);
    assert!(core.list_datasets().await.unwrap().is_empty());
    assert_eq!(core.dataset_sample(&meta.id).await.unwrap(), None);

    let last = core.pending_operations().await.unwrap().pop().unwrap();
    assert_eq!(
        last.op,
        OutboxOp::DeleteDataset {
            dataset_id: meta.id.clone(),
            cloud_id: None,
        }
    );

    assert!(core.remove_dataset(&meta.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rescan_unknown_dataset_is_none() {
    let core = CoreService::bootstrap(config(None).await).await.unwrap();
    let result = core
        .rescan_dataset("missing", rent_roll(), None)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_full_round_trip_through_rest_remote() {
    let requests: Arc<Mutex<Vec<(HttpMethod, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let requests_clone = requests.clone();

    let mut http = MockHttpClient::new();
    http.expect_execute().returning(move |req: HttpRequest| {
        requests_clone
            .lock()
            .unwrap()
            .push((req.method, req.url.clone()));
        Ok(created())
    });

    let core = CoreService::bootstrap(config(Some(Arc::new(http))).await)
        .await
        .unwrap();

    let meta = core
        .add_dataset(rent_roll(), Some(vec![json!({"unit": "1A"})]))
        .await
        .unwrap();

    let unauthenticated = core.trigger_sync().await.unwrap();
    assert_eq!(unauthenticated.skipped, Some(SkipReason::NotAuthenticated));
    assert!(requests.lock().unwrap().is_empty());

    core.set_access_token(Some("session-token".to_string()));
    let result = core.trigger_sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed, 2);

    let synced = core.get_dataset(&meta.id).await.unwrap().unwrap();
    assert_eq!(synced.cloud_id.as_deref(), Some(meta.id.as_str()));
    assert!(synced.last_synced.is_some());

    let rescanned = core
        .rescan_dataset(&meta.id, rent_roll().with_size(8_192), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rescanned.size, Some(8_192));
    assert_eq!(rescanned.cloud_id, synced.cloud_id);

    core.remove_dataset(&meta.id).await.unwrap();
    let result = core.trigger_sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed, 2);
    assert!(core.pending_operations().await.unwrap().is_empty());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].0, HttpMethod::Post);
    assert!(requests[0].1.ends_with("/rest/v1/datasets?on_conflict=id"));
    assert!(requests[1].1.ends_with("/rest/v1/dataset_samples?on_conflict=dataset_id"));
    assert_eq!(requests[3].0, HttpMethod::Delete);
    assert!(requests[3].1.ends_with(&format!("/rest/v1/datasets?id=eq.{}", meta.id)));
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let core = CoreService::bootstrap(config(None).await).await.unwrap();
    core.start().await.unwrap();
    assert!(core.sync_status().is_running);

    core.shutdown().await;
    assert!(!core.sync_status().is_running);
}

#[tokio::test]
async fn test_desktop_store_is_used_when_none_injected() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("propdash.db");

    let build = || {
        CoreConfig::builder()
            .database_path(db_path.clone())
            .network_monitor(Arc::new(AlwaysOnline))
            .build()
            .unwrap()
    };

    let id = {
        let core = CoreService::bootstrap(build()).await.unwrap();
        core.add_dataset(rent_roll(), None).await.unwrap().id
    };

    let reopened = CoreService::bootstrap(build()).await.unwrap();
    let datasets = reopened.list_datasets().await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].id, id);
    assert_eq!(reopened.sync_status().pending_items, 1);
}
