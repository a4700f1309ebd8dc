// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend.
//!
//! One table per entity kind, each row a JSON document keyed by its stable id:
//! ```sql
//! CREATE TABLE members (
//!   id TEXT PRIMARY KEY,
//!   payload TEXT NOT NULL      -- canonical entity as JSON
//! )
//! ```
//! plus `sync_meta(kind, last_sync_ms, last_error)` and a `store_info`
//! key/value table holding the schema version.
//!
//! Rows carry no write timestamps, so re-syncing identical remote data leaves
//! the file contents unchanged.

use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::model::{SyncMeta, Table};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{PersistentStore, Record, StorageError};

const SCHEMA_VERSION_KEY: &str = "schema_version";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite store with startup-mode retry.
    ///
    /// Accepts `sqlite:path/to/file.db` or `sqlite::memory:`.
    pub async fn open(connection_string: &str) -> Result<Self, StorageError> {
        let is_memory = connection_string.contains(":memory:");
        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database exists per connection, so it gets exactly one.
        let max_connections = if is_memory { 1 } else { 4 };

        let pool = retry("sqlite_open", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            }
        })
        .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for table in Table::ALL {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, payload TEXT NOT NULL)",
                table.name()
            );
            sqlx::query(&sql).execute(&self.pool).await.map_err(backend)?;
        }
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_meta (
                kind TEXT PRIMARY KEY,
                last_sync_ms INTEGER,
                last_error TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        sqlx::query("CREATE TABLE IF NOT EXISTS store_info (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        debug!("SQLite schema ready");
        Ok(())
    }

    /// Close the pool. Later calls fail with `StorageUnavailable` upstream.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn decode(table: Table, id: String, payload: &str) -> Result<Record, StorageError> {
        let value = serde_json::from_str(payload).map_err(|e| StorageError::Corruption {
            table,
            id: id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Record { id, value })
    }
}

fn backend(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolClosed => StorageError::Closed,
        other => StorageError::Backend(other.to_string()),
    }
}

fn upsert_sql(table: Table) -> String {
    format!(
        "INSERT INTO {} (id, payload) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
        table.name()
    )
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn put(&self, table: Table, id: &str, value: &Value) -> Result<(), StorageError> {
        sqlx::query(&upsert_sql(table))
            .bind(id)
            .bind(value.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn put_many(&self, table: Table, rows: &[Record]) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = upsert_sql(table);
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for row in rows {
            sqlx::query(&sql)
                .bind(row.id.as_str())
                .bind(row.value.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(rows.len())
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Value>, StorageError> {
        let sql = format!("SELECT payload FROM {} WHERE id = ?", table.name());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(Self::decode(table, id.to_string(), &payload)?.value))
            }
            None => Ok(None),
        }
    }

    async fn get_all(&self, table: Table) -> Result<Vec<Record>, StorageError> {
        let sql = format!("SELECT id, payload FROM {} ORDER BY id", table.name());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(backend)?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(backend)?;
                let payload: String = row.try_get("payload").map_err(backend)?;
                Self::decode(table, id, &payload)
            })
            .collect()
    }

    async fn delete_all(&self, table: Table) -> Result<(), StorageError> {
        let sql = format!("DELETE FROM {}", table.name());
        sqlx::query(&sql).execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }

    async fn get_meta(&self, table: Table) -> Result<Option<SyncMeta>, StorageError> {
        let row = sqlx::query("SELECT last_sync_ms, last_error FROM sync_meta WHERE kind = ?")
            .bind(table.name())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(Some(SyncMeta {
                last_sync_ms: row.try_get("last_sync_ms").map_err(backend)?,
                last_error: row.try_get("last_error").map_err(backend)?,
            })),
            None => Ok(None),
        }
    }

    async fn set_meta(&self, table: Table, meta: &SyncMeta) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sync_meta (kind, last_sync_ms, last_error) VALUES (?, ?, ?) \
             ON CONFLICT(kind) DO UPDATE SET last_sync_ms = excluded.last_sync_ms, \
             last_error = excluded.last_error",
        )
        .bind(table.name())
        .bind(meta.last_sync_ms)
        .bind(meta.last_error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn clear_meta(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sync_meta").execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StorageError> {
        let row = sqlx::query("SELECT value FROM store_info WHERE key = ?")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("value").map_err(backend)?;
                raw.parse().map_err(|_| StorageError::Backend(format!("bad schema version '{}'", raw)))
            }
            None => Ok(0),
        }
    }

    async fn set_schema_version(&self, version: u32) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO store_info (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SCHEMA_VERSION_KEY)
        .bind(version.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn count(&self, table: Table) -> Result<usize, StorageError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", table.name());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await.map_err(backend)?;
        let n: i64 = row.try_get("n").map_err(backend)?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("store.db").display());
        (SqliteStore::open(&url).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_open_creates_empty_store() {
        let (store, _dir) = temp_store().await;
        assert!(store.is_empty().await.unwrap());
        assert_eq!(store.schema_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let (store, _dir) = temp_store().await;
        store.put(Table::Sections, "49097", &json!({"id": "49097", "name": "Beavers"})).await.unwrap();
        store.put(Table::Sections, "49097", &json!({"id": "49097", "name": "Beavers B"})).await.unwrap();

        let value = store.get(Table::Sections, "49097").await.unwrap().unwrap();
        assert_eq!(value["name"], "Beavers B");
        assert_eq!(store.count(Table::Sections).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_many_is_visible_together() {
        let (store, _dir) = temp_store().await;
        let rows: Vec<Record> = (0..20).map(|i| Record::new(format!("{:02}", i), json!({"n": i}))).collect();
        assert_eq!(store.put_many(Table::Members, &rows).await.unwrap(), 20);

        let all = store.get_all(Table::Members).await.unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(all[0].id, "00");
        assert_eq!(all[19].value["n"], 19);
    }

    #[tokio::test]
    async fn test_meta_and_schema_version() {
        let (store, _dir) = temp_store().await;
        let meta = SyncMeta { last_sync_ms: Some(1_700_000_000_000), last_error: Some("token expired".into()) };
        store.set_meta(Table::Events, &meta).await.unwrap();
        assert_eq!(store.get_meta(Table::Events).await.unwrap(), Some(meta));
        assert!(store.get_meta(Table::Members).await.unwrap().is_none());

        store.set_schema_version(2).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("store.db").display());
        {
            let store = SqliteStore::open(&url).await.unwrap();
            store.put(Table::Events, "49097:e1", &json!({"id": "e1"})).await.unwrap();
            store.close().await;
        }
        let store = SqliteStore::open(&url).await.unwrap();
        assert!(store.get(Table::Events, "49097:e1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_closed_pool_reports_error() {
        let (store, _dir) = temp_store().await;
        store.close().await;
        assert!(store.get_all(Table::Sections).await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_url() {
        let store = SqliteStore::open("sqlite::memory:").await.unwrap();
        store.put(Table::Attendance, "e1:1", &json!({})).await.unwrap();
        assert_eq!(store.count(Table::Attendance).await.unwrap(), 1);
    }
}
