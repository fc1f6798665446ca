//! Key-Value Storage Abstraction
//!
//! Durable string records addressed by key. The catalog keeps whole JSON
//! documents under a handful of namespaced keys, so the contract is small:
//! single-key reads and writes, prefix listing, and a transaction for writes
//! that must land together.

use async_trait::async_trait;

use crate::error::Result;

/// Durable key-value storage trait
///
/// Abstracts platform-specific persistence:
/// - Desktop: SQLite table
/// - Mobile: SharedPreferences / UserDefaults or an embedded database
/// - Web: localStorage / IndexedDB
///
/// Every single-key write must be atomic: a reader observes either the old
/// value or the new value, never a partial one.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn save_catalog(store: &dyn KeyValueStore, json: &str) -> Result<()> {
///     store.set("propdash:catalog", json).await
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List keys starting with `prefix`, in ascending order
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Begin a transaction for atomic multi-key updates
    ///
    /// Nothing written through the transaction is visible until
    /// [`KeyValueTransaction::commit`] succeeds.
    async fn begin_transaction(&self) -> Result<Box<dyn KeyValueTransaction>>;
}

/// Transaction for atomic multi-key updates
#[async_trait]
pub trait KeyValueTransaction: Send {
    /// Set a value within the transaction
    async fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a key within the transaction
    async fn delete(&mut self, key: &str) -> Result<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
