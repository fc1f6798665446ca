//! PostgREST-style remote store over [`HttpClient`]

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_catalog::DatasetMeta;
use core_runtime::config::RemoteConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument, warn};

use crate::error::{RemoteError, RemoteErrorKind, RemoteResult};
use crate::remote::{RemoteStore, UpsertedDataset};

const DATASETS_TABLE: &str = "/rest/v1/datasets";
const SAMPLES_TABLE: &str = "/rest/v1/dataset_samples";

/// Longest response body excerpt kept in an error message
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Deserialize)]
struct DatasetRow {
    id: String,
}

/// Remote store speaking the PostgREST dialect.
///
/// The local dataset id doubles as the remote primary key, so every upsert
/// is `INSERT ... ON CONFLICT (id) DO UPDATE` and repeated deliveries are
/// harmless.
pub struct RestRemote {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestRemote {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &RemoteConfig) -> Self {
        Self {
            http_client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
        }
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(Some(token.into()));
        self
    }

    /// Sets or clears the user session token. Without one, writes are
    /// not attempted.
    pub fn set_access_token(&self, token: Option<String>) {
        let mut guard = self
            .access_token
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn request(&self, method: HttpMethod, path_and_query: &str) -> HttpRequest {
        let token = self.access_token().unwrap_or_else(|| self.api_key.clone());
        HttpRequest::new(method, format!("{}{}", self.base_url, path_and_query))
            .header("apikey", self.api_key.clone())
            .bearer_token(token)
    }

    async fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
        warn!(status = response.status, "Remote rejected request");
        Err(RemoteError::from_status(
            response.status,
            format!("HTTP {}: {}", response.status, excerpt),
        ))
    }

    fn encode<T: serde::Serialize>(request: HttpRequest, body: &T) -> RemoteResult<HttpRequest> {
        request
            .json(body)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Unknown, e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    fn is_configured(&self) -> bool {
        true
    }

    async fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    #[instrument(skip(self, meta), fields(dataset_id = %meta.id))]
    async fn upsert_dataset(&self, meta: &DatasetMeta) -> RemoteResult<UpsertedDataset> {
        let row = json!({
            "id": meta.id,
            "name": meta.name,
            "source": meta.source.as_str(),
            "size": meta.size,
            "modified_at": meta.modified_at,
            "fields": meta.fields,
            "schema": meta.schema,
        });

        let request = self
            .request(HttpMethod::Post, &format!("{}?on_conflict=id", DATASETS_TABLE))
            .header("Prefer", "resolution=merge-duplicates,return=representation");
        let response = self.send(Self::encode(request, &row)?).await?;

        // The representation echoes the stored row; fall back to our own id
        // if the backend answered without a body.
        let cloud_id = response
            .json::<Vec<DatasetRow>>()
            .ok()
            .and_then(|rows| rows.into_iter().next())
            .map(|row| row.id)
            .unwrap_or_else(|| meta.id.clone());

        debug!(cloud_id = %cloud_id, "Dataset upserted");
        Ok(UpsertedDataset { cloud_id })
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_dataset_sample(&self, dataset_id: &str, rows: &[Value]) -> RemoteResult<()> {
        let body = json!({
            "dataset_id": dataset_id,
            "sample": rows,
        });

        let request = self
            .request(
                HttpMethod::Post,
                &format!("{}?on_conflict=dataset_id", SAMPLES_TABLE),
            )
            .header("Prefer", "resolution=merge-duplicates,return=minimal");
        self.send(Self::encode(request, &body)?).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_dataset(&self, cloud_id: &str) -> RemoteResult<()> {
        let request = self.request(
            HttpMethod::Delete,
            &format!("{}?id=eq.{}", DATASETS_TABLE, urlencoding::encode(cloud_id)),
        );
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bytes::Bytes;
    use core_catalog::{DatasetSource, NewDataset};
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn remote(mock: MockHttpClient) -> RestRemote {
        RestRemote::new(
            Arc::new(mock),
            &RemoteConfig::new("https://db.example.co/", "anon-key"),
        )
        .with_access_token("session-token")
    }

    fn meta() -> DatasetMeta {
        NewDataset::new("Rent roll", DatasetSource::LocalFile).into_meta("d1")
    }

    #[tokio::test]
    async fn test_upsert_dataset_request_shape() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req: &HttpRequest| {
                req.method == HttpMethod::Post
                    && req.url == "https://db.example.co/rest/v1/datasets?on_conflict=id"
                    && req.headers.get("apikey").map(String::as_str) == Some("anon-key")
                    && req.headers.get("Authorization").map(String::as_str)
                        == Some("Bearer session-token")
                    && req
                        .headers
                        .get("Prefer")
                        .is_some_and(|p| p.contains("merge-duplicates"))
            })
            .times(1)
            .returning(|_| Ok(response(201, r#"[{"id":"d1","name":"Rent roll"}]"#)));

        let upserted = remote(mock).upsert_dataset(&meta()).await.unwrap();
        assert_eq!(upserted.cloud_id, "d1");
    }

    #[tokio::test]
    async fn test_upsert_without_body_uses_local_id() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .returning(|_| Ok(response(204, "")));

        let upserted = remote(mock).upsert_dataset(&meta()).await.unwrap();
        assert_eq!(upserted.cloud_id, "d1");
    }

    #[tokio::test]
    async fn test_status_codes_are_classified() {
        for (status, kind) in [
            (503, RemoteErrorKind::Server(503)),
            (429, RemoteErrorKind::RateLimited),
            (401, RemoteErrorKind::Unauthorized(401)),
            (409, RemoteErrorKind::Client(409)),
        ] {
            let mut mock = MockHttpClient::new();
            mock.expect_execute()
                .returning(move |_| Ok(response(status, r#"{"message":"nope"}"#)));

            let err = remote(mock).delete_dataset("d1").await.unwrap_err();
            assert_eq!(err.kind, kind);
            assert!(err.message.contains("nope"));
        }
    }

    #[tokio::test]
    async fn test_transport_failures_are_classified() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .returning(|_| Err(BridgeError::Timeout("deadline".to_string())));

        let err = remote(mock)
            .upsert_dataset_sample("d1", &[json!({ "a": 1 })])
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_targets_cloud_id() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req: &HttpRequest| {
                req.method == HttpMethod::Delete
                    && req.url == "https://db.example.co/rest/v1/datasets?id=eq.cloud-7"
            })
            .times(1)
            .returning(|_| Ok(response(204, "")));

        remote(mock).delete_dataset("cloud-7").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_encodes_cloud_id() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req: &HttpRequest| {
                req.url == "https://db.example.co/rest/v1/datasets?id=eq.a%26b%3D1%20c"
            })
            .times(1)
            .returning(|_| Ok(response(204, "")));

        remote(mock).delete_dataset("a&b=1 c").await.unwrap();
    }

    #[tokio::test]
    async fn test_authentication_follows_session_token() {
        let remote = RestRemote::new(
            Arc::new(MockHttpClient::new()),
            &RemoteConfig::new("https://db.example.co", "anon-key"),
        );
        assert!(remote.is_configured());
        assert!(!remote.is_authenticated().await);

        remote.set_access_token(Some("t".to_string()));
        assert!(remote.is_authenticated().await);

        remote.set_access_token(None);
        assert!(!remote.is_authenticated().await);
    }
}
