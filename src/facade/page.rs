// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Page snapshots served from the store, revalidated in the background.
//!
//! ```text
//!   use_page_data(kind)
//!          │
//!          ▼
//!   { data: None, loading: true }
//!          │  store read
//!          ▼
//!   { data: Some(..), loading: false, error: auth/storage error }
//!          │  stale && authenticated ──► engine.spawn_refresh(deps)
//!          ▼
//!   listener: run end / dependency stage completed ──► re-read store
//!             auth state change ──► error = token_expired / cleared
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::AuthState;
use crate::coordinator::{Stage, SyncEngine, SyncEvent, SyncReport, SyncRequest, SyncStatus};
use crate::error::SyncError;
use crate::model::{AttendanceRecord, Entity, Event, EventRef, Member, Section, StatusCounts};
use crate::normalize::parse_date;
use crate::storage::{load_entities, load_entity, PersistentStore, StorageError};

/// The pages the console renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageKind {
    Sections,
    Events,
    EventDetail { event_id: String, section_id: String },
    Movers,
}

impl PageKind {
    /// The forced-refresh request for this page's kinds.
    #[must_use]
    pub fn dependencies(&self) -> SyncRequest {
        match self {
            Self::Sections | Self::Movers => SyncRequest::kinds([Stage::Sections, Stage::Members]),
            Self::Events => SyncRequest::kinds([Stage::Sections, Stage::Events]),
            Self::EventDetail { event_id, section_id } => {
                SyncRequest::kinds([Stage::Members, Stage::Attendance]).with_events([EventRef {
                    section_id: section_id.clone(),
                    event_id: event_id.clone(),
                }])
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionsPage {
    pub sections: Vec<Section>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventsPage {
    pub sections: Vec<Section>,
    /// Events by section id, earliest first
    pub events: BTreeMap<String, Vec<Event>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDetailPage {
    pub event: Option<Event>,
    /// Members of the event's section
    pub members: Vec<Member>,
    pub attendance: Vec<AttendanceRecord>,
    pub summary: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoversPage {
    pub sections: Vec<Section>,
    /// Oldest first; members without a date of birth last
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageData {
    Sections(SectionsPage),
    Events(EventsPage),
    EventDetail(EventDetailPage),
    Movers(MoversPage),
}

impl PageData {
    #[must_use]
    pub fn empty(kind: &PageKind) -> Self {
        match kind {
            PageKind::Sections => Self::Sections(SectionsPage::default()),
            PageKind::Events => Self::Events(EventsPage::default()),
            PageKind::EventDetail { .. } => Self::EventDetail(EventDetailPage::default()),
            PageKind::Movers => Self::Movers(MoversPage::default()),
        }
    }

    #[must_use]
    pub fn as_sections(&self) -> Option<&SectionsPage> {
        match self {
            Self::Sections(page) => Some(page),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_events(&self) -> Option<&EventsPage> {
        match self {
            Self::Events(page) => Some(page),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_event_detail(&self) -> Option<&EventDetailPage> {
        match self {
            Self::EventDetail(page) => Some(page),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_movers(&self) -> Option<&MoversPage> {
        match self {
            Self::Movers(page) => Some(page),
            _ => None,
        }
    }
}

fn by_birth_date(a: &Member, b: &Member) -> CmpOrdering {
    let dob = |m: &Member| m.date_of_birth.as_deref().and_then(parse_date);
    match (dob(a), dob(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// Assemble a page from the store alone.
pub async fn load_page(store: &dyn PersistentStore, kind: &PageKind) -> Result<PageData, StorageError> {
    let data = match kind {
        PageKind::Sections => PageData::Sections(SectionsPage {
            sections: load_entities(store).await?,
            members: load_entities(store).await?,
        }),
        PageKind::Events => {
            let mut events: BTreeMap<String, Vec<Event>> = BTreeMap::new();
            for event in load_entities::<Event>(store).await? {
                events.entry(event.section_id.clone()).or_default().push(event);
            }
            for list in events.values_mut() {
                list.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
            }
            PageData::Events(EventsPage { sections: load_entities(store).await?, events })
        }
        PageKind::EventDetail { event_id, section_id } => {
            let key = Event { id: event_id.clone(), section_id: section_id.clone(), ..Event::default() }.key();
            let event: Option<Event> = load_entity(store, &key).await?;
            let attendance: Vec<AttendanceRecord> = load_entities::<AttendanceRecord>(store)
                .await?
                .into_iter()
                .filter(|r| &r.event_id == event_id && &r.section_id == section_id)
                .collect();
            let members: Vec<Member> = load_entities::<Member>(store)
                .await?
                .into_iter()
                .filter(|m| m.sections.contains_key(section_id))
                .collect();
            let summary = StatusCounts::tally(&attendance);
            PageData::EventDetail(EventDetailPage { event, members, attendance, summary })
        }
        PageKind::Movers => {
            let mut members: Vec<Member> = load_entities(store).await?;
            members.sort_by(by_birth_date);
            PageData::Movers(MoversPage { sections: load_entities(store).await?, members })
        }
    };
    Ok(data)
}

/// What a page renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    /// `None` until the first store read returns
    pub data: Option<PageData>,
    /// Initial read pending, or a forced refresh in flight
    pub loading: bool,
    pub error: Option<SyncError>,
}

impl PageSnapshot {
    fn initial() -> Self {
        Self { data: None, loading: true, error: None }
    }
}

/// Error implied by the session state alone.
fn auth_error(state: AuthState) -> Option<SyncError> {
    match state {
        AuthState::TokenExpired | AuthState::CachedOnly => Some(SyncError::TokenExpired),
        _ => None,
    }
}

/// State shared between a handle, its listener and its refreshes.
struct Shared {
    kind: PageKind,
    engine: Arc<SyncEngine>,
    tx: watch::Sender<PageSnapshot>,
    inflight: AtomicUsize,
}

impl Shared {
    fn publish(&self, update: impl FnOnce(&mut PageSnapshot)) {
        self.tx.send_modify(|snapshot| {
            update(snapshot);
            // read under the channel lock so the last writer sees the final count
            snapshot.loading = snapshot.data.is_none() || self.inflight.load(Ordering::Acquire) > 0;
        });
    }

    /// Re-read the store. A storage failure serves empty data.
    async fn reload(&self) {
        match load_page(self.engine.store().as_ref(), &self.kind).await {
            Ok(data) => self.publish(|s| s.data = Some(data)),
            Err(e) => {
                warn!(page = ?self.kind, error = %e, "Page read failed");
                let empty = PageData::empty(&self.kind);
                self.publish(|s| {
                    s.data = Some(empty);
                    s.error = Some(SyncError::from(e));
                });
            }
        }
    }

    async fn is_stale(&self, request: &SyncRequest) -> bool {
        self.engine.needs_sync(request).await.unwrap_or(true)
    }
}

/// Clears the in-flight mark even when the refresh future is dropped.
struct InflightGuard<'a> {
    shared: &'a Shared,
}

impl<'a> InflightGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.inflight.fetch_add(1, Ordering::AcqRel);
        shared.publish(|_| {});
        Self { shared }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.shared.inflight.fetch_sub(1, Ordering::AcqRel);
        self.shared.publish(|_| {});
    }
}

/// A live view of one page. Dropping it stops the listener; any sync it
/// started keeps running.
pub struct PageHandle {
    shared: Arc<Shared>,
    rx: watch::Receiver<PageSnapshot>,
    listener: JoinHandle<()>,
}

impl PageHandle {
    pub(super) fn spawn(engine: Arc<SyncEngine>, kind: PageKind) -> Self {
        let (tx, rx) = watch::channel(PageSnapshot::initial());
        // subscribe before the first read so no run end is missed
        let events = engine.subscribe();
        let auth = engine.tokens().subscribe();
        let shared = Arc::new(Shared { kind, engine, tx, inflight: AtomicUsize::new(0) });
        let listener = tokio::spawn(listen(Arc::clone(&shared), events, auth));
        Self { shared, rx, listener }
    }

    #[must_use]
    pub fn kind(&self) -> &PageKind {
        &self.shared.kind
    }

    #[must_use]
    pub fn snapshot(&self) -> PageSnapshot {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PageSnapshot> {
        self.rx.clone()
    }

    /// Wait until data is present and nothing is loading.
    pub async fn ready(&self) -> PageSnapshot {
        let mut rx = self.rx.clone();
        let ready = match rx.wait_for(|s| s.data.is_some() && !s.loading).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        ready.unwrap_or_else(|| self.snapshot())
    }

    /// Forced sync of this page's kinds, through the engine's coalescing
    /// and rate limits. The page re-reads the store before returning.
    pub async fn refresh(&self) -> SyncReport {
        let shared = &self.shared;
        let _inflight = InflightGuard::enter(shared);
        let report = shared.engine.refresh(shared.kind.dependencies().forced()).await;
        shared.reload().await;
        let error = report.error.clone();
        shared.publish(|s| s.error = error);
        report
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<SyncEvent>,
    mut auth: watch::Receiver<AuthState>,
) {
    let state = *auth.borrow_and_update();
    let initial_error = auth_error(state);
    shared.publish(|s| s.error = initial_error);
    shared.reload().await;

    let dependencies = shared.kind.dependencies();
    if state.is_authenticated() && shared.is_stale(&dependencies).await {
        debug!(page = ?shared.kind, "Serving cached page, revalidating");
        // fire and forget; the run end event triggers the re-read
        drop(shared.engine.spawn_refresh(dependencies.clone()));
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let dependency_done = matches!(event.status, SyncStatus::Completed { records } if records > 0)
                        && event.stage.is_some_and(|s| dependencies.plan().contains(&s));
                    if event.is_run_end() {
                        shared.reload().await;
                        let error = match event.status {
                            SyncStatus::Error(err) => Some(err),
                            _ => auth_error(shared.engine.tokens().state()),
                        };
                        shared.publish(|s| s.error = error);
                    } else if dependency_done {
                        shared.reload().await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Page listener lagged, re-reading");
                    shared.reload().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = auth.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *auth.borrow_and_update();
                shared.publish(|s| match auth_error(state) {
                    Some(err) => s.error = Some(err),
                    None if s.error == Some(SyncError::TokenExpired) => s.error = None,
                    None => {}
                });
            }
        }
    }
}
