//! SQLite-backed key-value store

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::types::{check_value_size, Collection, KvStore};
use crate::error::Result;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, key)
);
"#;

/// Create a new database connection pool and initialize the schema
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::query(SCHEMA_SQL).execute(&pool).await?;

    Ok(pool)
}

/// Store persisting every collection in one `kv` table
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
    max_value_size: usize,
}

impl SqliteKvStore {
    pub fn with_max_value_size(pool: SqlitePool, max_value_size: usize) -> Self {
        Self {
            pool,
            max_value_size,
        }
    }

    /// Open (creating if needed) the database at `database_url`
    pub async fn connect(database_url: &str, max_value_size: usize) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        tracing::info!(url = %database_url, "Opened SQLite store");
        Ok(Self::with_max_value_size(pool, max_value_size))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM kv WHERE collection = ? AND key = ?",
        )
        .bind(collection.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<()> {
        check_value_size(collection, value, self.max_value_size)?;

        sqlx::query(
            r#"
            INSERT INTO kv (collection, key, value, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(collection, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE collection = ? AND key = ?")
            .bind(collection.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv WHERE collection = ? ORDER BY key",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }

    fn max_value_size(&self) -> usize {
        self.max_value_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> SqliteKvStore {
        let url = format!("sqlite:{}", dir.path().join("kv.db").display());
        SqliteKvStore::connect(&url, 16).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.put(Collection::Chunks, "k", b"bytes").await.unwrap();
        assert_eq!(
            store.get(Collection::Chunks, "k").await.unwrap(),
            Some(b"bytes".to_vec())
        );

        store.put(Collection::Chunks, "k", b"other").await.unwrap();
        assert_eq!(
            store.get(Collection::Chunks, "k").await.unwrap(),
            Some(b"other".to_vec())
        );
        assert_eq!(store.count(Collection::Chunks).await.unwrap(), 1);

        assert!(store.delete(Collection::Chunks, "k").await.unwrap());
        assert!(!store.delete(Collection::Chunks, "k").await.unwrap());
        assert_eq!(store.get(Collection::Chunks, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_collection() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.put(Collection::Sessions, "b", b"1").await.unwrap();
        store.put(Collection::Sessions, "a", b"2").await.unwrap();
        store.put(Collection::Blobs, "c", b"3").await.unwrap();

        assert_eq!(
            store.keys(Collection::Sessions).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(store.count(Collection::Blobs).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.put(Collection::Blobs, "kept", b"v").await.unwrap();
            store.pool().close().await;
        }

        let store = open(&dir).await;
        assert_eq!(
            store.get(Collection::Blobs, "kept").await.unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[tokio::test]
    async fn test_value_size_limit() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let result = store.put(Collection::Chunks, "big", &[0u8; 17]).await;
        assert!(matches!(result, Err(BlobError::ResourceExhausted(_))));
    }
}
