// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{SyncMeta, Table};
use super::traits::{PersistentStore, Record, StorageError};

/// Process-local store. Each table is an ordered map behind its own lock so
/// a `put_many` lands as one unit.
pub struct MemoryStore {
    tables: DashMap<Table, RwLock<BTreeMap<String, Value>>>,
    meta: DashMap<Table, SyncMeta>,
    schema_version: AtomicU32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let tables = DashMap::new();
        for table in Table::ALL {
            tables.insert(table, RwLock::new(BTreeMap::new()));
        }
        Self {
            tables,
            meta: DashMap::new(),
            schema_version: AtomicU32::new(0),
        }
    }

    /// Row count of one table
    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map(|t| t.read().len()).unwrap_or(0)
    }

    /// Copy of every table, for comparing whole-store contents.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<Table, BTreeMap<String, Value>> {
        Table::ALL
            .into_iter()
            .map(|table| {
                let rows = self.tables.get(&table).map(|t| t.read().clone()).unwrap_or_default();
                (table, rows)
            })
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(&self, table: Table, id: &str, value: &Value) -> Result<(), StorageError> {
        let entry = self.tables.get(&table).ok_or(StorageError::Closed)?;
        entry.write().insert(id.to_string(), value.clone());
        Ok(())
    }

    async fn put_many(&self, table: Table, rows: &[Record]) -> Result<usize, StorageError> {
        let entry = self.tables.get(&table).ok_or(StorageError::Closed)?;
        let mut guard = entry.write();
        for row in rows {
            guard.insert(row.id.clone(), row.value.clone());
        }
        Ok(rows.len())
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Value>, StorageError> {
        let entry = self.tables.get(&table).ok_or(StorageError::Closed)?;
        let value = entry.read().get(id).cloned();
        Ok(value)
    }

    async fn get_all(&self, table: Table) -> Result<Vec<Record>, StorageError> {
        let entry = self.tables.get(&table).ok_or(StorageError::Closed)?;
        let rows = entry
            .read()
            .iter()
            .map(|(id, value)| Record::new(id.clone(), value.clone()))
            .collect();
        Ok(rows)
    }

    async fn delete_all(&self, table: Table) -> Result<(), StorageError> {
        let entry = self.tables.get(&table).ok_or(StorageError::Closed)?;
        entry.write().clear();
        Ok(())
    }

    async fn get_meta(&self, table: Table) -> Result<Option<SyncMeta>, StorageError> {
        Ok(self.meta.get(&table).map(|m| m.value().clone()))
    }

    async fn set_meta(&self, table: Table, meta: &SyncMeta) -> Result<(), StorageError> {
        self.meta.insert(table, meta.clone());
        Ok(())
    }

    async fn clear_meta(&self) -> Result<(), StorageError> {
        self.meta.clear();
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StorageError> {
        Ok(self.schema_version.load(Ordering::SeqCst))
    }

    async fn set_schema_version(&self, version: u32) -> Result<(), StorageError> {
        self.schema_version.store(version, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self, table: Table) -> Result<usize, StorageError> {
        Ok(self.len(table))
    }
}
