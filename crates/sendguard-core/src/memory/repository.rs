//! `SQLite`-backed memory store.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use crate::Result;

/// Namespaced key/value store.
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    /// Creates the store, creating its table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS memory_blobs (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores a value, replacing any existing value for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO memory_blobs (namespace, key, value, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Serializes and stores a value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database query fails.
    pub async fn put_json<T: Serialize + Sync>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.put(namespace, key, &json).await
    }

    /// Gets a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM memory_blobs WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }

    /// Gets and deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query or deserialization fails.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(namespace, key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Lists every entry of a namespace, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM memory_blobs WHERE namespace = ? ORDER BY key ASC",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| (r.get("key"), r.get("value"))).collect())
    }

    /// Lists entries of a namespace whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_prefix(&self, namespace: &str, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r"
            SELECT key, value FROM memory_blobs
            WHERE namespace = ? AND substr(key, 1, length(?)) = ?
            ORDER BY key ASC
            ",
        )
        .bind(namespace)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| (r.get("key"), r.get("value"))).collect())
    }

    /// Deletes an entry. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM memory_blobs WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> MemoryStore {
        MemoryStore::new(db::in_memory().await.unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_replace() {
        let store = store().await;
        store.put("ns", "k", "v1").await.unwrap();
        store.put("ns", "k", "v2").await.unwrap();

        assert_eq!(store.get("ns", "k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.get("other", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = store().await;
        store.put("c", "yahoo/bounce/1", "a").await.unwrap();
        store.put("c", "yahoo/bounce/2", "b").await.unwrap();
        store.put("c", "yahoo/complaint/1", "c").await.unwrap();
        store.put("d", "yahoo/bounce/3", "d").await.unwrap();

        let entries = store.list_prefix("c", "yahoo/bounce/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(store.list("c").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_json_and_delete() {
        let store = store().await;
        store.put_json("n", "x", &vec![1, 2, 3]).await.unwrap();
        let value: Option<Vec<i32>> = store.get_json("n", "x").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        assert!(store.delete("n", "x").await.unwrap());
        assert!(!store.delete("n", "x").await.unwrap());
    }
}
