// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot rescue of legacy flat storage.
//!
//! Earlier console versions cached everything as small flat keys:
//!
//! | Legacy key | Lands in |
//! |---|---|
//! | `viking_sections_offline` | `sections` |
//! | `viking_members_comprehensive_offline` | `members` |
//! | `viking_events_<sectionId>_offline` | `events` |
//! | `viking_attendance_<eventId>_offline` | `attendance` |
//! | any other `viking_*` key | `migration_kv`, verbatim |
//!
//! Migration runs when the store's schema version is behind
//! [`CURRENT_SCHEMA_VERSION`]. After copying, the whole `viking_` namespace
//! is removed from the legacy source and the version is bumped, so a second
//! open is a no-op.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::model::{AttendanceRecord, Entity, Event, EventRef, Member, Section, Table};
use crate::normalize::{envelope_rows, merge_members, normalize_attendance, normalize_events, normalize_members, normalize_sections};
use super::traits::{load_entities, put_entities, PersistentStore, Record, StorageError};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const LEGACY_PREFIX: &str = "viking_";
const SECTIONS_KEY: &str = "viking_sections_offline";
const MEMBERS_KEY: &str = "viking_members_comprehensive_offline";
const OFFLINE_SUFFIX: &str = "_offline";

/// Synchronous flat string storage from older versions.
pub trait LegacyStorage: Send + Sync {
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Option<String>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process legacy storage.
#[derive(Default)]
pub struct MemoryLegacy {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLegacy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LegacyStorage for MemoryLegacy {
    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Legacy storage exported to a JSON object file (`{"key": "value", ...}`).
pub struct JsonFileLegacy {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileLegacy {
    /// Load the file; a missing file is an empty source.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let parsed: BTreeMap<String, Value> = serde_json::from_str(&raw)
                    .map_err(|e| StorageError::Backend(format!("legacy file {}: {}", path.display(), e)))?;
                parsed
                    .into_iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, text)
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries).map_err(|e| StorageError::Backend(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| StorageError::Backend(e.to_string()))
    }
}

impl LegacyStorage for JsonFileLegacy {
    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// What a migration moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub sections: usize,
    pub members: usize,
    pub events: usize,
    pub attendance: usize,
    pub rescued: usize,
    pub skipped: Vec<String>,
}

impl MigrationReport {
    #[must_use]
    pub fn ran(&self) -> bool {
        self.from_version != self.to_version
    }
}

/// The id embedded in `viking_<what>_<id>_offline`.
fn embedded_id<'a>(key: &'a str, what: &str) -> Option<&'a str> {
    key.strip_prefix(LEGACY_PREFIX)?
        .strip_prefix(what)?
        .strip_prefix('_')?
        .strip_suffix(OFFLINE_SUFFIX)
        .filter(|id| !id.is_empty())
}

/// Migrate legacy flat keys into `store` if its schema is behind.
///
/// Unparseable recognised keys are rescued into `migration_kv` instead of
/// failing the open.
pub async fn migrate(
    store: &dyn PersistentStore,
    legacy: &dyn LegacyStorage,
    today: NaiveDate,
) -> Result<MigrationReport, SyncError> {
    let from_version = store.schema_version().await?;
    let mut report = MigrationReport { from_version, to_version: from_version, ..Default::default() };
    if from_version >= CURRENT_SCHEMA_VERSION {
        return Ok(report);
    }

    let keys: Vec<String> = legacy.keys().into_iter().filter(|k| k.starts_with(LEGACY_PREFIX)).collect();
    info!(from_version, legacy_keys = keys.len(), "Migrating legacy storage");

    let mut sections: Vec<Section> = Vec::new();
    let mut members: Vec<Member> = Vec::new();
    let mut events: Vec<Event> = Vec::new();
    let mut attendance: Vec<AttendanceRecord> = Vec::new();
    let mut rescued: Vec<Record> = Vec::new();

    for key in &keys {
        let Some(raw) = legacy.get(key) else { continue };
        let parsed: Option<Value> = serde_json::from_str(&raw).ok();

        let outcome: Option<Result<(), SyncError>> = match (key.as_str(), parsed.as_ref()) {
            (SECTIONS_KEY, Some(v)) => Some(normalize_sections(v).map(|s| sections.extend(s))),
            (MEMBERS_KEY, Some(v)) => Some(legacy_members(v, today).map(|m| members.extend(m))),
            (k, Some(v)) if embedded_id(k, "events").is_some() => {
                let section_id = embedded_id(k, "events").unwrap_or_default();
                Some(normalize_events(v, section_id).map(|e| events.extend(e)))
            }
            (k, Some(v)) if embedded_id(k, "attendance").is_some() => {
                let event_id = embedded_id(k, "attendance").unwrap_or_default();
                Some(legacy_attendance(v, event_id).map(|a| attendance.extend(a)))
            }
            _ => None,
        };

        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Legacy value not understood, rescuing verbatim");
                report.skipped.push(key.clone());
                rescued.push(Record::new(key.clone(), Value::String(raw)));
            }
            None => rescued.push(Record::new(key.clone(), parsed.unwrap_or(Value::String(raw)))),
        }
    }

    report.sections = put_entities(store, &sections).await?;
    report.members = merge_into_store(store, members).await?;
    report.events = put_entities(store, &events).await?;
    report.attendance = put_entities(store, &attendance).await?;
    report.rescued = store.put_many(Table::MigrationKv, &rescued).await?;

    for key in &keys {
        legacy.remove(key)?;
    }
    store.set_schema_version(CURRENT_SCHEMA_VERSION).await?;
    report.to_version = CURRENT_SCHEMA_VERSION;

    info!(
        sections = report.sections,
        members = report.members,
        events = report.events,
        attendance = report.attendance,
        rescued = report.rescued,
        "Legacy migration complete"
    );
    Ok(report)
}

/// Older caches stored members either as an envelope or as a bare array
/// whose rows already carry `sectionid`/`sectionname`.
fn legacy_members(value: &Value, today: NaiveDate) -> Result<Vec<Member>, SyncError> {
    let rows = envelope_rows(value)?;
    let mut out = Vec::new();
    for row in rows {
        let section = Section {
            id: row.text(&["sectionid", "section_id"]).unwrap_or_default(),
            name: row.text(&["sectionname", "section_name"]).unwrap_or_default(),
            ..Default::default()
        };
        let single = Value::Array(vec![Value::Object(row.fields)]);
        out.extend(normalize_members(&single, &section, today)?);
    }
    Ok(merge_members(out))
}

fn legacy_attendance(value: &Value, event_id: &str) -> Result<Vec<AttendanceRecord>, SyncError> {
    let rows = envelope_rows(value)?;
    let section_id = rows
        .iter()
        .find_map(|r| r.text(&["sectionid", "section_id"]))
        .unwrap_or_default();
    normalize_attendance(value, &EventRef { section_id, event_id: event_id.to_string() })
}

async fn merge_into_store(store: &dyn PersistentStore, members: Vec<Member>) -> Result<usize, SyncError> {
    if members.is_empty() {
        return Ok(0);
    }
    let existing: Vec<Member> = load_entities(store).await?;
    let merged = merge_members(existing.into_iter().chain(members.clone()));
    let touched: Vec<Member> = merged
        .into_iter()
        .filter(|m| members.iter().any(|n| n.key() == m.key()))
        .collect();
    Ok(put_entities(store, &touched).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::traits::load_entity;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
    }

    fn seeded_legacy() -> MemoryLegacy {
        let legacy = MemoryLegacy::new();
        legacy.insert(SECTIONS_KEY, json!([{"sectionid": 49097, "sectionname": "Beavers"}]).to_string());
        legacy.insert(
            MEMBERS_KEY,
            json!([
                {"scoutid": 2486157, "firstname": "Alex", "sectionid": 49097, "sectionname": "Beavers"},
                {"scoutid": 2486157, "firstname": "Alex", "sectionid": 11107, "sectionname": "Cubs"}
            ])
            .to_string(),
        );
        legacy.insert("viking_events_49097_offline", json!({"items": [{"eventid": "e1", "name": "Camp"}]}).to_string());
        legacy.insert(
            "viking_attendance_e1_offline",
            json!([{"scoutid": 2486157, "attending": "Yes", "sectionid": 49097}]).to_string(),
        );
        legacy.insert("viking_last_sync", "1700000000000");
        legacy.insert("unrelated_key", "keep me");
        legacy
    }

    #[test]
    fn test_embedded_id() {
        assert_eq!(embedded_id("viking_events_49097_offline", "events"), Some("49097"));
        assert_eq!(embedded_id("viking_attendance_e1_offline", "attendance"), Some("e1"));
        assert_eq!(embedded_id("viking_events__offline", "events"), None);
        assert_eq!(embedded_id("viking_sections_offline", "events"), None);
    }

    #[tokio::test]
    async fn test_migrates_recognised_keys() {
        let store = MemoryStore::new();
        let legacy = seeded_legacy();

        let report = migrate(&store, &legacy, today()).await.unwrap();
        assert!(report.ran());
        assert_eq!(report.sections, 1);
        assert_eq!(report.members, 1);
        assert_eq!(report.events, 1);
        assert_eq!(report.attendance, 1);
        assert_eq!(report.rescued, 1);

        let member: Member = load_entity(&store, "2486157").await.unwrap().unwrap();
        assert_eq!(member.sections.len(), 2);
        let event: Event = load_entity(&store, "49097:e1").await.unwrap().unwrap();
        assert_eq!(event.name, "Camp");
        let record: AttendanceRecord = load_entity(&store, "e1:2486157").await.unwrap().unwrap();
        assert_eq!(record.section_id, "49097");

        assert_eq!(store.get(Table::MigrationKv, "viking_last_sync").await.unwrap(), Some(json!(1700000000000i64)));
        assert_eq!(store.schema_version().await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_legacy_namespace_is_dropped() {
        let store = MemoryStore::new();
        let legacy = seeded_legacy();
        migrate(&store, &legacy, today()).await.unwrap();

        assert_eq!(legacy.keys(), vec!["unrelated_key".to_string()]);
    }

    #[tokio::test]
    async fn test_second_open_is_noop() {
        let store = MemoryStore::new();
        migrate(&store, &seeded_legacy(), today()).await.unwrap();

        let again = seeded_legacy();
        let report = migrate(&store, &again, today()).await.unwrap();
        assert!(!report.ran());
        // nothing touched on the second pass
        assert_eq!(again.len(), 6);
    }

    #[tokio::test]
    async fn test_garbage_values_are_rescued() {
        let store = MemoryStore::new();
        let legacy = MemoryLegacy::new();
        legacy.insert(SECTIONS_KEY, "{not json");
        legacy.insert(MEMBERS_KEY, json!({"rows": []}).to_string());

        let report = migrate(&store, &legacy, today()).await.unwrap();
        assert_eq!(report.sections, 0);
        assert_eq!(report.skipped, vec![MEMBERS_KEY.to_string()]);
        assert_eq!(report.rescued, 2);
        assert!(legacy.is_empty());
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, json!({"viking_sections_offline": [{"id": "1", "name": "Cubs"}], "viking_theme": "dark"}).to_string()).unwrap();

        let legacy = JsonFileLegacy::open(&path).unwrap();
        let store = MemoryStore::new();
        let report = migrate(&store, &legacy, today()).await.unwrap();
        assert_eq!(report.sections, 1);
        assert_eq!(report.rescued, 1);

        let reopened = JsonFileLegacy::open(&path).unwrap();
        assert!(reopened.keys().is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = JsonFileLegacy::open(dir.path().join("absent.json")).unwrap();
        assert!(legacy.keys().is_empty());
    }
}
