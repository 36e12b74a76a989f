//! SQLite key-value store.
//!
//! A file-based backend using SQLite. Good for:
//! - Local runs that must survive restarts
//! - Resuming a crashed run from its PENDING entries

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};
use crate::traits::kv::KvStore;

/// SQLite-backed key-value store.
pub struct SqliteKv {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

impl SqliteKv {
    /// Open (creating if needed) a store at the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://harvest.db` - File-based database
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store (for testing). Single connection so every query sees
    /// the same database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct KvRow {
    key: String,
    value: String,
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query_as::<_, KvRow>("SELECT key, value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.map(|r| r.value))
    }

    async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StoreResult<bool> {
        // Each branch is a single statement, which SQLite executes atomically
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO NOTHING",
                )
                .bind(key)
                .bind(new)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await
            }
            Some(current) => {
                sqlx::query("UPDATE kv SET value = ?, updated_at = ? WHERE key = ? AND value = ?")
                    .bind(new)
                    .bind(Utc::now().to_rfc3339())
                    .bind(key)
                    .bind(current)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, KvRow>(
            "SELECT key, value FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_cas_semantics() {
        let kv = SqliteKv::in_memory().await.unwrap();

        assert!(kv.compare_and_swap("record:a", None, "p").await.unwrap());
        assert!(!kv.compare_and_swap("record:a", None, "p2").await.unwrap());
        assert!(kv.compare_and_swap("record:a", Some("p"), "d").await.unwrap());
        assert_eq!(kv.get("record:a").await.unwrap().as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_sqlite_scan_prefix() {
        let kv = SqliteKv::in_memory().await.unwrap();
        kv.put("record:b", "2").await.unwrap();
        kv.put("record:a", "1").await.unwrap();
        kv.put("session:current", "s").await.unwrap();

        let rows = kv.scan_prefix("record:").await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("record:a".to_string(), "1".to_string()),
                ("record:b".to_string(), "2".to_string())
            ]
        );
    }
}
