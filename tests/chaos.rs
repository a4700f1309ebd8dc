// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos Testing for the Scout data layer
//!
//! This module tests failure scenarios using:
//! 1. **FailingStore wrapper** - storage errors switched on and off mid-test
//! 2. **Scripted transport faults** - offline, 5xx, 403, slow responses
//! 3. **Clock jumps** - the credential expiring part-way through a run
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use scout_sync::clock::ManualClock;
use scout_sync::model::{Event, Section, SyncMeta, Table};
use scout_sync::remote::adapter::{ATTENDANCE_PATH, EVENTS_PATH, MEMBERS_PATH, SECTIONS_PATH, USER_PATH};
use scout_sync::remote::{HttpRequest, HttpResponse, ScriptedTransport, Transport, TransportError};
use scout_sync::storage::{load_entities, MemoryStore, PersistentStore, Record, SqliteStore, StorageError};
use scout_sync::{AuthGrant, AuthState, DataFacade, PageData, PageKind, Stage, StageOutcome, SyncConfig, SyncError, SyncRequest};

const T0: i64 = 1_705_752_000_000;

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a store and fails reads and/or writes while switched on.
pub struct FailingStore<S: PersistentStore> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failures: AtomicU64,
}

impl<S: PersistentStore> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        }
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Backend("injected disk failure".into()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<(), StorageError> {
        self.check(&self.fail_reads)
    }

    fn write(&self) -> Result<(), StorageError> {
        self.check(&self.fail_writes)
    }
}

#[async_trait]
impl<S: PersistentStore> PersistentStore for FailingStore<S> {
    async fn put(&self, table: Table, id: &str, value: &Value) -> Result<(), StorageError> {
        self.write()?;
        self.inner.put(table, id, value).await
    }

    async fn put_many(&self, table: Table, rows: &[Record]) -> Result<usize, StorageError> {
        self.write()?;
        self.inner.put_many(table, rows).await
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Value>, StorageError> {
        self.read()?;
        self.inner.get(table, id).await
    }

    async fn get_all(&self, table: Table) -> Result<Vec<Record>, StorageError> {
        self.read()?;
        self.inner.get_all(table).await
    }

    async fn delete_all(&self, table: Table) -> Result<(), StorageError> {
        self.write()?;
        self.inner.delete_all(table).await
    }

    async fn get_meta(&self, table: Table) -> Result<Option<SyncMeta>, StorageError> {
        self.read()?;
        self.inner.get_meta(table).await
    }

    async fn set_meta(&self, table: Table, meta: &SyncMeta) -> Result<(), StorageError> {
        self.write()?;
        self.inner.set_meta(table, meta).await
    }

    async fn clear_meta(&self) -> Result<(), StorageError> {
        self.write()?;
        self.inner.clear_meta().await
    }

    async fn schema_version(&self) -> Result<u32, StorageError> {
        self.read()?;
        self.inner.schema_version().await
    }

    async fn set_schema_version(&self, version: u32) -> Result<(), StorageError> {
        self.write()?;
        self.inner.set_schema_version(version).await
    }
}

// =============================================================================
// Clock-jumping transport
// =============================================================================

/// Delegates to a scripted transport and jumps the clock forward after
/// answering `trigger_path`.
struct ExpiringTransport {
    inner: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
    trigger_path: &'static str,
    jump_ms: i64,
}

#[async_trait]
impl Transport for ExpiringTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let hit = request.url.path() == self.trigger_path;
        let response = self.inner.send(request).await;
        if hit {
            self.clock.advance(self.jump_ms);
        }
        response
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn script(transport: &ScriptedTransport) {
    transport.respond_json(USER_PATH, json!({"userid": "u1", "firstname": "Ada"}));
    transport.respond_json(SECTIONS_PATH, json!([{"id": "49097", "name": "Beavers"}]));
    transport.respond_json(EVENTS_PATH, json!({"data": {"e1": {"name": "Camp", "startdate": "2024-01-20"}}}));
    transport.respond_json(MEMBERS_PATH, json!({"items": [{"scoutid": 1, "firstname": "Kit"}]}));
    transport.respond_json(ATTENDANCE_PATH, json!({"items": [{"scoutid": 1, "attending": "No"}]}));
}

fn grant() -> AuthGrant {
    AuthGrant { access_token: "leader-token".into(), expires_in: 3600.0 }
}

async fn open(
    store: Arc<dyn PersistentStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<ManualClock>,
    config: SyncConfig,
) -> DataFacade {
    DataFacade::open(config, store, transport, clock).await.expect("facade opens")
}

async fn logged_in_memory() -> (DataFacade, Arc<ScriptedTransport>, Arc<FailingStore<MemoryStore>>) {
    let transport = ScriptedTransport::new();
    script(&transport);
    let store = Arc::new(FailingStore::new(MemoryStore::new()));
    let facade = open(store.clone(), transport.clone(), ManualClock::new(T0), SyncConfig::for_tests()).await;
    facade.use_auth().login(&grant()).await.unwrap();
    (facade, transport, store)
}

// =============================================================================
// Storage failures
// =============================================================================

#[tokio::test]
async fn chaos_storage_failure_latches_read_only() {
    let (facade, transport, store) = logged_in_memory().await;
    let engine = facade.engine();

    store.fail_writes(true);
    let report = engine.refresh(SyncRequest::all()).await;

    assert!(matches!(report.error, Some(SyncError::StorageUnavailable(_))));
    assert!(matches!(report.outcome(Stage::Sections), Some(StageOutcome::Failed(SyncError::StorageUnavailable(_)))));
    assert_eq!(report.outcome(Stage::Attendance), Some(&StageOutcome::Skipped));
    assert!(engine.is_read_only());

    // later runs fail fast without touching the network
    let sections_calls = transport.call_count(SECTIONS_PATH);
    let again = engine.refresh(SyncRequest::all().forced()).await;
    assert!(matches!(again.error, Some(SyncError::StorageUnavailable(_))));
    assert!(again.stages.iter().all(|(_, outcome)| *outcome == StageOutcome::Skipped));
    assert_eq!(transport.call_count(SECTIONS_PATH), sections_calls);

    // a successful reset re-enables sync
    store.fail_writes(false);
    engine.reset().await.unwrap();
    assert!(!engine.is_read_only());
    let healed = engine.refresh(SyncRequest::all()).await;
    assert!(healed.is_success(), "{:?}", healed.error);
}

#[tokio::test]
async fn chaos_unreadable_store_serves_empty_page() {
    let transport = ScriptedTransport::new();
    script(&transport);
    let store = Arc::new(FailingStore::new(MemoryStore::new()));
    store.fail_reads(true);
    let facade = open(store.clone(), transport.clone(), ManualClock::new(T0), SyncConfig::for_tests()).await;

    let kind = PageKind::Events;
    let snapshot = facade.use_page_data(kind.clone()).ready().await;

    assert_eq!(snapshot.data, Some(PageData::empty(&kind)));
    assert!(matches!(snapshot.error, Some(SyncError::StorageUnavailable(_))));
    assert!(!snapshot.loading);
    assert!(store.failures() > 0);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn chaos_closed_sqlite_store_disables_sync() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("closed.db").display());
    let store = Arc::new(SqliteStore::open(&url).await.unwrap());
    let transport = ScriptedTransport::new();
    script(&transport);
    let facade = open(store.clone(), transport.clone(), ManualClock::new(T0), SyncConfig::for_tests()).await;
    facade.use_auth().login(&grant()).await.unwrap();

    store.close().await;
    let report = facade.engine().refresh(SyncRequest::kinds([Stage::Sections])).await;

    assert!(matches!(report.error, Some(SyncError::StorageUnavailable(_))));
    assert!(facade.engine().is_read_only());
    assert_eq!(transport.call_count(SECTIONS_PATH), 0);
}

// =============================================================================
// Transport failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_offline_exhausts_retries_and_keeps_cache() {
    let (facade, transport, store) = logged_in_memory().await;
    let engine = facade.engine();
    engine.refresh(SyncRequest::kinds([Stage::Events])).await;
    let cached: Vec<Event> = load_entities(store.as_ref()).await.unwrap();

    transport.go_offline();
    let before = transport.call_count(SECTIONS_PATH);
    let report = engine.refresh(SyncRequest::kinds([Stage::Sections]).forced()).await;

    assert!(matches!(report.error, Some(SyncError::NetworkUnavailable(_))));
    // first attempt plus the retry budget
    let budget = engine.config().retry.max_attempts;
    assert_eq!(transport.call_count(SECTIONS_PATH) - before, 1 + budget);
    assert_eq!(load_entities::<Event>(store.as_ref()).await.unwrap(), cached);

    let meta = store.get_meta(Table::Sections).await.unwrap().unwrap();
    assert_eq!(meta.last_error.as_deref(), Some("network_unavailable"));
    assert_eq!(engine.tokens().state(), AuthState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn chaos_transient_server_errors_recover() {
    let (facade, transport, _store) = logged_in_memory().await;
    transport.enqueue(SECTIONS_PATH, HttpResponse::new(503, ""));
    transport.enqueue_failure(SECTIONS_PATH, "connection reset");

    let report = facade.engine().refresh(SyncRequest::kinds([Stage::Sections])).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(transport.call_count(SECTIONS_PATH), 3);
}

#[tokio::test]
async fn chaos_permanent_server_error_is_not_retried() {
    let (facade, transport, _store) = logged_in_memory().await;
    transport.respond(SECTIONS_PATH, HttpResponse::new(501, ""));

    let report = facade.engine().refresh(SyncRequest::kinds([Stage::Sections])).await;

    assert_eq!(report.error, Some(SyncError::ServerError(501)));
    assert_eq!(transport.call_count(SECTIONS_PATH), 1);
}

#[tokio::test]
async fn chaos_forbidden_halts_run_but_keeps_session() {
    let (facade, transport, store) = logged_in_memory().await;
    transport.respond(MEMBERS_PATH, HttpResponse::new(403, ""));

    let report = facade.engine().refresh(SyncRequest::all()).await;

    assert_eq!(report.error, Some(SyncError::Forbidden));
    assert_eq!(report.outcome(Stage::Sections), Some(&StageOutcome::Synced { records: 1 }));
    assert_eq!(report.outcome(Stage::Events), Some(&StageOutcome::Skipped));
    assert_eq!(report.outcome(Stage::Attendance), Some(&StageOutcome::Skipped));
    assert_eq!(facade.use_auth().state(), AuthState::Authenticated);
    assert_eq!(load_entities::<Section>(store.as_ref()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn chaos_decode_error_keeps_previous_rows() {
    let (facade, transport, store) = logged_in_memory().await;
    let engine = facade.engine();
    engine.refresh(SyncRequest::kinds([Stage::Events])).await;

    transport.respond_json(EVENTS_PATH, json!({"unexpected": true}));
    let report = engine.refresh(SyncRequest::kinds([Stage::Events]).forced()).await;

    assert!(matches!(report.outcome(Stage::Events), Some(StageOutcome::Failed(SyncError::DecodeError(_)))));
    let events: Vec<Event> = load_entities(store.as_ref()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "Camp");
}

#[tokio::test(start_paused = true)]
async fn chaos_request_deadline_becomes_network_unavailable() {
    let transport = ScriptedTransport::new();
    script(&transport);
    let mut config = SyncConfig::for_tests();
    config.request_deadline_ms = 100;
    config.retry.max_attempts = 1;
    let facade = open(Arc::new(MemoryStore::new()), transport.clone(), ManualClock::new(T0), config).await;
    facade.use_auth().login(&grant()).await.unwrap();
    transport.set_latency(Duration::from_secs(5));

    let started = Instant::now();
    let report = facade.engine().refresh(SyncRequest::kinds([Stage::Sections])).await;

    assert!(matches!(report.error, Some(SyncError::NetworkUnavailable(_))));
    assert_eq!(transport.call_count(SECTIONS_PATH), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// =============================================================================
// Session failures
// =============================================================================

#[tokio::test]
async fn chaos_token_expires_mid_sync() {
    let scripted = ScriptedTransport::new();
    script(&scripted);
    let clock = ManualClock::new(T0);
    let transport = Arc::new(ExpiringTransport {
        inner: scripted.clone(),
        clock: clock.clone(),
        trigger_path: SECTIONS_PATH,
        jump_ms: 2 * 3_600_000,
    });
    let store = Arc::new(MemoryStore::new());
    let facade = open(store.clone(), transport, clock, SyncConfig::for_tests()).await;
    facade.use_auth().login(&grant()).await.unwrap();

    let report = facade.engine().refresh(SyncRequest::all()).await;

    assert_eq!(report.outcome(Stage::Sections), Some(&StageOutcome::Synced { records: 1 }));
    assert_eq!(report.outcome(Stage::Members), Some(&StageOutcome::Failed(SyncError::TokenExpired)));
    assert_eq!(report.outcome(Stage::Events), Some(&StageOutcome::Skipped));
    assert_eq!(report.outcome(Stage::Attendance), Some(&StageOutcome::Skipped));
    assert_eq!(facade.use_auth().state(), AuthState::TokenExpired);

    let sections: Vec<Section> = load_entities(store.as_ref()).await.unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(scripted.call_count(MEMBERS_PATH), 0);
}

#[tokio::test]
async fn chaos_unauthorized_mid_sync_surfaces_on_page() {
    let (facade, transport, _store) = logged_in_memory().await;
    facade.engine().refresh(SyncRequest::kinds([Stage::Sections, Stage::Events])).await;
    transport.respond(EVENTS_PATH, HttpResponse::new(401, ""));

    let page = facade.use_page_data(PageKind::Events);
    page.ready().await;
    let report = page.refresh().await;

    assert_eq!(report.error, Some(SyncError::Unauthorized));
    let snapshot = page.snapshot();
    assert!(snapshot.error.as_ref().is_some_and(SyncError::is_auth_failure));
    assert_eq!(snapshot.data.unwrap().as_events().unwrap().events["49097"].len(), 1);
    assert_eq!(facade.use_auth().state(), AuthState::TokenExpired);
}

#[tokio::test(start_paused = true)]
async fn chaos_logout_cancels_rate_limit_wait() {
    let (facade, transport, _store) = logged_in_memory().await;
    transport.enqueue(SECTIONS_PATH, HttpResponse::new(429, "").with_header("retry-after", "60"));

    let started = Instant::now();
    let run = facade.engine().spawn_refresh(SyncRequest::kinds([Stage::Sections]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    facade.use_auth().logout();
    let report = run.await.unwrap();

    assert_eq!(report.error, Some(SyncError::TokenExpired));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(transport.call_count(SECTIONS_PATH), 1);
    assert_eq!(facade.use_auth().state(), AuthState::NoData);
}

#[tokio::test]
async fn chaos_failed_user_lookup_rejects_credential() {
    let transport = ScriptedTransport::new();
    transport.respond(USER_PATH, HttpResponse::new(401, ""));
    let facade = open(Arc::new(MemoryStore::new()), transport.clone(), ManualClock::new(T0), SyncConfig::for_tests()).await;

    let err = facade.use_auth().login(&grant()).await.unwrap_err();

    assert_eq!(err, SyncError::Unauthorized);
    assert_eq!(facade.use_auth().state(), AuthState::TokenExpired);
    assert!(facade.use_auth().user().is_none());
}

#[tokio::test]
async fn chaos_migration_rescues_garbage_legacy_values() {
    use scout_sync::storage::{migrate, MemoryLegacy, CURRENT_SCHEMA_VERSION};

    let store = MemoryStore::new();
    let legacy = MemoryLegacy::new();
    legacy.insert("viking_sections_offline", "{not json");
    legacy.insert("viking_events_49097_offline", r#"{"items": "wrong"}"#);
    legacy.insert("viking_theme", "\"dark\"");
    legacy.insert("unrelated", "kept");

    let today = chrono::NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
    let report = migrate(&store, &legacy, today).await.unwrap();

    assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.skipped, vec!["viking_events_49097_offline".to_string()]);
    let rescued: BTreeMap<String, Value> = store
        .get_all(Table::MigrationKv)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.id, r.value))
        .collect();
    assert_eq!(rescued.len(), 3);
    assert_eq!(rescued["viking_theme"], json!("dark"));
    assert_eq!(legacy.len(), 1);
}
