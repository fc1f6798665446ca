//! Remote store contract
//!
//! The sync processor talks to the remote backend only through
//! [`RemoteStore`]. Every call returns a tagged [`RemoteResult`] whose error
//! kind was decided at the boundary, so the processor never inspects
//! transport details.

use async_trait::async_trait;
use core_catalog::DatasetMeta;
use serde_json::Value;

use crate::error::{RemoteError, RemoteResult};

/// Outcome of a successful dataset upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedDataset {
    /// Identifier the remote assigned (or confirmed) for the dataset
    pub cloud_id: String,
}

/// Remote collaborator for outbox delivery.
///
/// All three operations must be idempotent by key: the outbox may deliver
/// the same operation again after a crash between remote success and local
/// removal.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether a backend is configured at all.
    fn is_configured(&self) -> bool;

    /// Whether the current session may write.
    async fn is_authenticated(&self) -> bool;

    async fn upsert_dataset(&self, meta: &DatasetMeta) -> RemoteResult<UpsertedDataset>;

    /// Replaces the cached sample rows of a dataset.
    async fn upsert_dataset_sample(&self, dataset_id: &str, rows: &[Value]) -> RemoteResult<()>;

    /// Deletes a dataset. Deleting an unknown id succeeds.
    async fn delete_dataset(&self, cloud_id: &str) -> RemoteResult<()>;
}

/// Remote used when no backend is configured.
///
/// Outbox items keep accumulating locally; drains are skipped before any
/// of these methods would be reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

#[async_trait]
impl RemoteStore for NullRemote {
    fn is_configured(&self) -> bool {
        false
    }

    async fn is_authenticated(&self) -> bool {
        false
    }

    async fn upsert_dataset(&self, _meta: &DatasetMeta) -> RemoteResult<UpsertedDataset> {
        Err(RemoteError::not_configured())
    }

    async fn upsert_dataset_sample(&self, _dataset_id: &str, _rows: &[Value]) -> RemoteResult<()> {
        Err(RemoteError::not_configured())
    }

    async fn delete_dataset(&self, _cloud_id: &str) -> RemoteResult<()> {
        Err(RemoteError::not_configured())
    }
}
