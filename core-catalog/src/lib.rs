//! # Catalog & Outbox Store
//!
//! Durable local registry of dataset metadata plus the outbox of pending
//! remote operations, persisted through a host
//! [`KeyValueStore`](bridge_traits::KeyValueStore).
//!
//! Three kinds of records live under one namespace:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `{namespace}:catalog` | JSON array of [`DatasetMeta`] |
//! | `{namespace}:outbox` | JSON array of [`OutboxItem`], FIFO |
//! | `{namespace}:sample:{datasetId}` | JSON array of cached sample rows |
//!
//! Every mutation re-reads the latest persisted list under the store's write
//! lock before writing it back, so an enqueue racing a drain cannot be lost.

pub mod error;
pub mod models;
pub mod store;

pub use error::{CatalogError, Result};
pub use models::{
    ColumnSchema, DatasetMeta, DatasetSource, NewDataset, NewOutboxItem, OutboxItem, OutboxOp,
};
pub use store::CatalogStore;
