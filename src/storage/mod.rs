// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent store: one logical table per entity kind plus sync metadata.
//!
//! - [`MemoryStore`]: process-local, used in tests and as a fallback
//! - [`SqliteStore`]: durable SQLite file
//! - [`migration`]: one-shot rescue of legacy flat key/value storage

pub mod traits;
pub mod memory;
pub mod sql;
pub mod migration;

pub use traits::{PersistentStore, Record, StorageError, put_entities, load_entities, load_entity};
pub use memory::MemoryStore;
pub use sql::SqliteStore;
pub use migration::{LegacyStorage, MemoryLegacy, JsonFileLegacy, migrate, CURRENT_SCHEMA_VERSION};
