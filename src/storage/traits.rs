// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Entity, SyncMeta, Table};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt row in {table} for '{id}': {reason}")]
    Corruption {
        table: Table,
        id: String,
        reason: String,
    },
    #[error("Store is closed")]
    Closed,
}

/// One keyed row of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub value: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self { id: id.into(), value }
    }
}

/// Durable keyed storage, one logical table per entity kind.
///
/// Writes within a single `put_many` are visible together. There is no
/// cross-table transaction; callers track partial progress with
/// [`SyncMeta`]. Reads return rows ordered by id.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put(&self, table: Table, id: &str, value: &Value) -> Result<(), StorageError>;

    /// Upsert many rows atomically within one table.
    async fn put_many(&self, table: Table, rows: &[Record]) -> Result<usize, StorageError>;

    async fn get(&self, table: Table, id: &str) -> Result<Option<Value>, StorageError>;

    async fn get_all(&self, table: Table) -> Result<Vec<Record>, StorageError>;

    /// Drop every row of a table. Only explicit resets call this.
    async fn delete_all(&self, table: Table) -> Result<(), StorageError>;

    async fn get_meta(&self, table: Table) -> Result<Option<SyncMeta>, StorageError>;

    async fn set_meta(&self, table: Table, meta: &SyncMeta) -> Result<(), StorageError>;

    async fn clear_meta(&self) -> Result<(), StorageError>;

    async fn schema_version(&self) -> Result<u32, StorageError>;

    async fn set_schema_version(&self, version: u32) -> Result<(), StorageError>;

    /// Rows matching a predicate.
    /// Default implementation filters `get_all`.
    async fn get_where(
        &self,
        table: Table,
        predicate: &(dyn for<'r> Fn(&'r Record) -> bool + Send + Sync),
    ) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .get_all(table)
            .await?
            .into_iter()
            .filter(|r| predicate(r))
            .collect())
    }

    async fn count(&self, table: Table) -> Result<usize, StorageError> {
        Ok(self.get_all(table).await?.len())
    }

    /// True when no entity table holds a row.
    async fn is_empty(&self) -> Result<bool, StorageError> {
        for table in Table::ENTITIES {
            if self.count(table).await? > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Row count of every entity table.
    async fn row_counts(&self) -> Result<BTreeMap<Table, usize>, StorageError> {
        let mut counts = BTreeMap::new();
        for table in Table::ENTITIES {
            counts.insert(table, self.count(table).await?);
        }
        Ok(counts)
    }
}

/// Serialise and upsert typed entities.
pub async fn put_entities<T: Entity>(
    store: &dyn PersistentStore,
    entities: &[T],
) -> Result<usize, StorageError> {
    let rows = entities
        .iter()
        .map(|e| {
            serde_json::to_value(e)
                .map(|value| Record::new(e.key(), value))
                .map_err(|err| StorageError::Backend(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    store.put_many(T::TABLE, &rows).await
}

/// Load and decode every row of an entity's table.
pub async fn load_entities<T: Entity>(store: &dyn PersistentStore) -> Result<Vec<T>, StorageError> {
    store
        .get_all(T::TABLE)
        .await?
        .into_iter()
        .map(|r| decode_row(T::TABLE, r))
        .collect()
}

/// Load one entity by key.
pub async fn load_entity<T: Entity>(
    store: &dyn PersistentStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(T::TABLE, key).await? {
        Some(value) => decode_row(T::TABLE, Record::new(key, value)).map(Some),
        None => Ok(None),
    }
}

fn decode_row<T: Entity>(table: Table, record: Record) -> Result<T, StorageError> {
    serde_json::from_value(record.value).map_err(|e| StorageError::Corruption {
        table,
        id: record.id,
        reason: e.to_string(),
    })
}
