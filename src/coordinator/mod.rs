// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] pulls remote data into the persistent store along the
//! dependency DAG:
//!
//! ```text
//!              ┌──► members ──┐
//!   sections ──┤              │
//!              └──► events ───┴──► attendance
//! ```
//!
//! Stages run in that order. Within a stage, ids are fetched through a
//! stage-local gate (bounded fan-out plus inter-request delay) on top of the
//! adapter's global [`RateGate`](crate::remote::RateGate).
//!
//! # Coalescing
//!
//! At most one run is active. A `refresh()` arriving while a run is active
//! either joins it (when that run already covers the request) or joins the
//! single pending run, whose request is the union of everything queued. All
//! callers of a run receive the same [`SyncReport`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scout_sync::{SyncConfig, SyncEngine, SyncRequest, Stage, TokenStore};
//! use scout_sync::clock::SystemClock;
//! use scout_sync::remote::{RemoteAdapter, ReqwestTransport};
//! use scout_sync::storage::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), scout_sync::SyncError> {
//! let config = SyncConfig::default();
//! let clock = Arc::new(SystemClock);
//! let tokens = Arc::new(TokenStore::new(clock.clone(), config.token_skew_ms));
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let adapter = Arc::new(RemoteAdapter::new(&config, transport)?);
//! let engine = SyncEngine::new(config, tokens, Arc::new(MemoryStore::new()), adapter, clock);
//!
//! let report = engine.refresh(SyncRequest::kinds([Stage::Events])).await;
//! println!("run {} wrote {} records", report.run_id, report.records());
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod types;

pub use types::{Stage, StageOutcome, SyncEvent, SyncReport, SyncRequest, SyncStatus};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenStore;
use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::model::{AttendanceRecord, EventRef, Table};
use crate::remote::RemoteAdapter;
use crate::storage::{load_entities, PersistentStore};

type ReportRx = watch::Receiver<Option<SyncReport>>;
type ReportTx = watch::Sender<Option<SyncReport>>;

/// The run slots: the active run (if any) and the single pending run.
#[derive(Default)]
struct Slots {
    active: Option<(SyncRequest, ReportRx)>,
    pending: Option<Pending>,
}

struct Pending {
    request: SyncRequest,
    tx: ReportTx,
    rx: ReportRx,
}

/// Pipeline orchestrator. The only writer of the persistent store.
pub struct SyncEngine {
    pub(super) config: SyncConfig,
    pub(super) tokens: Arc<TokenStore>,
    pub(super) store: Arc<dyn PersistentStore>,
    pub(super) adapter: Arc<RemoteAdapter>,
    pub(super) clock: SharedClock,
    pub(super) events: broadcast::Sender<SyncEvent>,
    slots: Mutex<Slots>,
    /// Latched by a storage failure; every later run fails fast
    pub(super) read_only: AtomicBool,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        config: SyncConfig,
        tokens: Arc<TokenStore>,
        store: Arc<dyn PersistentStore>,
        adapter: Arc<RemoteAdapter>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            tokens,
            store,
            adapter,
            clock,
            events,
            slots: Mutex::new(Slots::default()),
            read_only: AtomicBool::new(false),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<RemoteAdapter> {
        &self.adapter
    }

    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Lifecycle notifications for every run.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// A storage failure has disabled sync.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// A run is active.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.slots.lock().active.is_some()
    }

    /// Whether `stage` was synced inside the freshness window.
    pub async fn is_fresh(&self, stage: Stage) -> Result<bool, SyncError> {
        let meta = self.store.get_meta(stage.table()).await?.unwrap_or_default();
        Ok(meta.is_fresh(self.clock.now_ms(), self.config.freshness_window_ms))
    }

    /// Targeted events that have no attendance stored yet.
    ///
    /// Attendance freshness is kept per table, so an event seen for the
    /// first time is stale even inside the window.
    pub async fn unsynced_events(&self, events: &BTreeSet<EventRef>) -> Result<Vec<EventRef>, SyncError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let stored: BTreeSet<EventRef> = load_entities::<AttendanceRecord>(self.store.as_ref())
            .await?
            .into_iter()
            .map(|r| EventRef { section_id: r.section_id, event_id: r.event_id })
            .collect();
        Ok(events.iter().filter(|e| !stored.contains(e)).cloned().collect())
    }

    /// Whether an unforced `request` would fetch anything.
    pub async fn needs_sync(&self, request: &SyncRequest) -> Result<bool, SyncError> {
        for stage in &request.kinds {
            if !self.is_fresh(*stage).await? {
                return Ok(true);
            }
        }
        if request.kinds.contains(&Stage::Attendance) {
            return Ok(!self.unsynced_events(&request.events).await?.is_empty());
        }
        Ok(false)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Runs
    // ═══════════════════════════════════════════════════════════════════════

    /// Sync the requested kinds, coalescing with any run already underway.
    #[tracing::instrument(skip_all, fields(force = request.force))]
    pub async fn refresh(self: &Arc<Self>, request: SyncRequest) -> SyncReport {
        let mut rx = self.enqueue(request);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(report) => report.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            warn!("Sync run ended without a report");
            let now = self.clock.now_ms();
            SyncReport {
                run_id: Uuid::nil(),
                started_at_ms: now,
                finished_at_ms: now,
                stages: Vec::new(),
                error: Some(SyncError::InvalidArgument("sync run aborted".into())),
            }
        })
    }

    /// Fire-and-forget refresh. Dropping the handle does not cancel the run.
    pub fn spawn_refresh(self: &Arc<Self>, request: SyncRequest) -> JoinHandle<SyncReport> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.refresh(request).await })
    }

    fn enqueue(self: &Arc<Self>, request: SyncRequest) -> ReportRx {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;

        let Some((active_request, active_rx)) = &slots.active else {
            let (tx, rx) = watch::channel(None);
            slots.active = Some((request.clone(), rx.clone()));
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.drive(request, tx).await });
            return rx;
        };

        if active_request.covers(&request) {
            debug!("Joining active sync run");
            metrics::record_coalesced();
            return active_rx.clone();
        }

        metrics::record_coalesced();
        match &mut slots.pending {
            Some(pending) => {
                debug!("Merging into pending sync run");
                pending.request.merge(request);
                pending.rx.clone()
            }
            None => {
                debug!("Queueing pending sync run");
                let (tx, rx) = watch::channel(None);
                slots.pending = Some(Pending { request, tx, rx: rx.clone() });
                rx
            }
        }
    }

    /// Run the active request, then each pending request, until idle.
    async fn drive(self: Arc<Self>, mut request: SyncRequest, mut tx: ReportTx) {
        let _release = ActiveSlotGuard { engine: &*self };
        loop {
            let report = self.run_once(&request).await;
            tx.send_replace(Some(report));

            let next = {
                let mut slots = self.slots.lock();
                match slots.pending.take() {
                    Some(pending) => {
                        slots.active = Some((pending.request.clone(), pending.rx.clone()));
                        Some(pending)
                    }
                    None => {
                        slots.active = None;
                        None
                    }
                }
            };
            match next {
                Some(pending) => {
                    request = pending.request;
                    tx = pending.tx;
                }
                None => break,
            }
        }
    }

    /// Drop the run slots after a panicked run. Waiters see their sender
    /// close and get an aborted report.
    fn release_slots(&self) {
        let mut slots = self.slots.lock();
        slots.active = None;
        slots.pending = None;
    }

    /// Delete every synced row and all sync metadata.
    pub async fn reset(&self) -> Result<(), SyncError> {
        for table in Table::ENTITIES {
            self.store.delete_all(table).await?;
        }
        self.store.clear_meta().await?;
        self.tokens.set_cache_present(false);
        if self.read_only.swap(false, Ordering::AcqRel) {
            info!("Storage reset succeeded, sync re-enabled");
        }
        info!("Store reset");
        Ok(())
    }
}

/// Frees the run slots if `drive` unwinds, so later refreshes start a
/// new run instead of waiting on one that will never report.
struct ActiveSlotGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for ActiveSlotGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Sync run panicked, releasing run slots");
            self.engine.release_slots();
        }
    }
}
