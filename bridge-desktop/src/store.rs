//! Key-Value Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{KeyValueStore, KeyValueTransaction},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_records (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO kv_records (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

fn storage_err(context: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::Storage(format!("{}: {}", context, e))
}

/// SQLite-backed key-value store implementation
///
/// Each record is one row; a single `set` is one statement and therefore
/// atomic. Multi-key writes go through [`KeyValueStore::begin_transaction`].
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| storage_err("Failed to open database", e))?;

        Self::create_table(&pool).await?;
        debug!(path = ?db_path, "Initialized key-value store");

        Ok(Self { pool })
    }

    /// Create an in-memory store (for testing)
    ///
    /// The pool is pinned to a single connection; every connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| storage_err("Failed to open database", e))?;

        Self::create_table(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| storage_err("Failed to create table", e))?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to read record", e))?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(Self::now())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to write record", e))?;

        debug!(key = key, bytes = value.len(), "Stored record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to delete record", e))?;

        debug!(key = key, "Deleted record");
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM kv_records WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list keys", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn KeyValueTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("Failed to begin transaction", e))?;

        Ok(Box::new(SqliteKeyValueTransaction { tx: Some(tx) }))
    }
}

/// SQLite key-value transaction
struct SqliteKeyValueTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
}

impl SqliteKeyValueTransaction {
    fn active(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.tx.as_mut().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })
    }
}

#[async_trait]
impl KeyValueTransaction for SqliteKeyValueTransaction {
    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let tx = self.active()?;

        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(SqliteKeyValueStore::now())
            .execute(&mut **tx)
            .await
            .map_err(|e| storage_err("Failed to write record", e))?;

        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let tx = self.active()?;

        sqlx::query("DELETE FROM kv_records WHERE key = ?")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(|e| storage_err("Failed to delete record", e))?;

        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })?;

        tx.commit()
            .await
            .map_err(|e| storage_err("Failed to commit", e))?;

        debug!("Committed transaction");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })?;

        tx.rollback()
            .await
            .map_err(|e| storage_err("Failed to rollback", e))?;

        debug!("Rolled back transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();

        store.set("ns:catalog", "[]").await.unwrap();
        assert_eq!(store.get("ns:catalog").await.unwrap(), Some("[]".to_string()));
        assert!(store.has_key("ns:catalog").await.unwrap());

        store.set("ns:catalog", "[1]").await.unwrap();
        assert_eq!(store.get("ns:catalog").await.unwrap(), Some("[1]".to_string()));

        store.delete("ns:catalog").await.unwrap();
        assert_eq!(store.get("ns:catalog").await.unwrap(), None);

        // Deleting again is fine
        store.delete("ns:catalog").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();

        store.set("ns:sample:b", "[]").await.unwrap();
        store.set("ns:sample:a", "[]").await.unwrap();
        store.set("ns:outbox", "[]").await.unwrap();
        store.set("other:sample:c", "[]").await.unwrap();

        let keys = store.list_keys("ns:sample:").await.unwrap();
        assert_eq!(keys, vec!["ns:sample:a", "ns:sample:b"]);
    }

    #[tokio::test]
    async fn test_transaction_commit() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();
        store.set("gone", "x").await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set("a", "1").await.unwrap();
        tx.set("b", "2").await.unwrap();
        tx.delete("gone").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), Some("2".to_string()));
        assert_eq!(store.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();
        store.set("a", "before").await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set("a", "after").await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("before".to_string()));
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        {
            let store = SqliteKeyValueStore::new(path.clone()).await.unwrap();
            store.set("ns:outbox", r#"[{"id":"1"}]"#).await.unwrap();
        }

        let reopened = SqliteKeyValueStore::new(path).await.unwrap();
        assert_eq!(
            reopened.get("ns:outbox").await.unwrap(),
            Some(r#"[{"id":"1"}]"#.to_string())
        );
    }
}
