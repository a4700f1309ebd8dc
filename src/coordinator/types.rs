// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{EventRef, Table};

/// One step of the pipeline: sections → {members, events} → attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Sections,
    Members,
    Events,
    Attendance,
}

impl Stage {
    /// Pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Sections, Stage::Members, Stage::Events, Stage::Attendance];

    #[must_use]
    pub fn table(&self) -> Table {
        match self {
            Self::Sections => Table::Sections,
            Self::Members => Table::Members,
            Self::Events => Table::Events,
            Self::Attendance => Table::Attendance,
        }
    }

    #[must_use]
    pub fn from_table(table: Table) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.table() == table)
    }

    /// The stage whose output this one reads.
    #[must_use]
    pub fn upstream(&self) -> Option<Stage> {
        match self {
            Self::Sections => None,
            Self::Members | Self::Events => Some(Self::Sections),
            Self::Attendance => Some(Self::Events),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.table().name()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller wants refreshed.
///
/// Upstream stages of a requested kind run too, but only when stale;
/// `force` applies to the requested kinds themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub kinds: BTreeSet<Stage>,
    pub force: bool,
    /// Attendance targets. Empty means every stored event.
    pub events: BTreeSet<EventRef>,
}

impl SyncRequest {
    #[must_use]
    pub fn all() -> Self {
        Self::kinds(Stage::ALL)
    }

    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = Stage>) -> Self {
        Self { kinds: kinds.into_iter().collect(), ..Self::default() }
    }

    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: impl IntoIterator<Item = EventRef>) -> Self {
        self.events.extend(events);
        self
    }

    /// Fold another request into this one (set-union, force OR).
    pub fn merge(&mut self, other: SyncRequest) {
        // an empty event set means "all events", which absorbs any list
        let all_events = (self.kinds.contains(&Stage::Attendance) && self.events.is_empty())
            || (other.kinds.contains(&Stage::Attendance) && other.events.is_empty());
        self.kinds.extend(other.kinds);
        self.force |= other.force;
        if all_events {
            self.events.clear();
        } else {
            self.events.extend(other.events);
        }
    }

    /// Whether running `self` also satisfies `other`.
    #[must_use]
    pub fn covers(&self, other: &SyncRequest) -> bool {
        let events_covered = !other.kinds.contains(&Stage::Attendance)
            || self.events.is_empty()
            || (!other.events.is_empty() && other.events.is_subset(&self.events));
        other.kinds.is_subset(&self.kinds) && (self.force || !other.force) && events_covered
    }

    /// Requested kinds plus their upstream stages, in pipeline order.
    #[must_use]
    pub fn plan(&self) -> Vec<Stage> {
        let mut needed: BTreeSet<Stage> = BTreeSet::new();
        for kind in &self.kinds {
            let mut cursor = Some(*kind);
            while let Some(stage) = cursor {
                needed.insert(stage);
                cursor = stage.upstream();
            }
        }
        Stage::ALL.into_iter().filter(|s| needed.contains(s)).collect()
    }

    /// Whether `stage` ignores the freshness window in this request.
    #[must_use]
    pub fn forces(&self, stage: Stage) -> bool {
        self.force && self.kinds.contains(&stage)
    }
}

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Fetched and persisted this many records
    Synced { records: usize },
    /// Inside the freshness window, nothing fetched
    Fresh,
    /// Not attempted because an earlier stage halted the run or failed
    Skipped,
    Failed(SyncError),
}

impl StageOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "synced",
            Self::Fresh => "fresh",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// Upstream output is usable by dependants.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Synced { .. } | Self::Fresh)
    }
}

/// Outcome of one run, shared by every caller it satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub stages: Vec<(Stage, StageOutcome)>,
    /// First failure of the run, halting or not
    pub error: Option<SyncError>,
}

impl SyncReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, o)| o)
    }

    /// Records persisted across all stages.
    #[must_use]
    pub fn records(&self) -> usize {
        self.stages
            .iter()
            .map(|(_, o)| match o {
                StageOutcome::Synced { records } => *records,
                _ => 0,
            })
            .sum()
    }
}

/// Lifecycle notifications on the in-process bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Started,
    Progress { done: usize, total: usize },
    Completed { records: usize },
    Error(SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub run_id: Uuid,
    /// `None` for run-level notifications
    pub stage: Option<Stage>,
    pub status: SyncStatus,
    pub at_ms: i64,
}

impl SyncEvent {
    /// The whole run finished (successfully or not).
    #[must_use]
    pub fn is_run_end(&self) -> bool {
        self.stage.is_none() && matches!(self.status, SyncStatus::Completed { .. } | SyncStatus::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> EventRef {
        EventRef { section_id: "1".into(), event_id: id.into() }
    }

    #[test]
    fn test_plan_pulls_in_upstream() {
        assert_eq!(
            SyncRequest::kinds([Stage::Events]).plan(),
            vec![Stage::Sections, Stage::Events]
        );
        assert_eq!(
            SyncRequest::kinds([Stage::Attendance]).plan(),
            vec![Stage::Sections, Stage::Events, Stage::Attendance]
        );
        assert_eq!(SyncRequest::all().plan(), Stage::ALL.to_vec());
    }

    #[test]
    fn test_force_only_applies_to_requested() {
        let request = SyncRequest::kinds([Stage::Events]).forced();
        assert!(request.forces(Stage::Events));
        assert!(!request.forces(Stage::Sections));
    }

    #[test]
    fn test_merge_unions() {
        let mut a = SyncRequest::kinds([Stage::Members]);
        a.merge(SyncRequest::kinds([Stage::Events]).forced());
        assert!(a.kinds.contains(&Stage::Members) && a.kinds.contains(&Stage::Events));
        assert!(a.force);
    }

    #[test]
    fn test_merge_all_events_absorbs_list() {
        let mut a = SyncRequest::kinds([Stage::Attendance]).with_events([event("e1")]);
        a.merge(SyncRequest::kinds([Stage::Attendance]));
        assert!(a.events.is_empty());

        let mut b = SyncRequest::kinds([Stage::Attendance]).with_events([event("e1")]);
        b.merge(SyncRequest::kinds([Stage::Attendance]).with_events([event("e2")]));
        assert_eq!(b.events.len(), 2);
    }

    #[test]
    fn test_covers() {
        let running = SyncRequest::kinds([Stage::Sections, Stage::Events]);
        assert!(running.covers(&SyncRequest::kinds([Stage::Events])));
        assert!(!running.covers(&SyncRequest::kinds([Stage::Events]).forced()));
        assert!(!running.covers(&SyncRequest::kinds([Stage::Members])));

        let attendance = SyncRequest::kinds([Stage::Attendance]).with_events([event("e1")]);
        assert!(attendance.covers(&SyncRequest::kinds([Stage::Attendance]).with_events([event("e1")])));
        assert!(!attendance.covers(&SyncRequest::kinds([Stage::Attendance])));
    }

    #[test]
    fn test_report_records() {
        let report = SyncReport {
            run_id: Uuid::nil(),
            started_at_ms: 0,
            finished_at_ms: 1,
            stages: vec![
                (Stage::Sections, StageOutcome::Synced { records: 2 }),
                (Stage::Members, StageOutcome::Fresh),
                (Stage::Events, StageOutcome::Synced { records: 3 }),
            ],
            error: None,
        };
        assert_eq!(report.records(), 5);
        assert!(report.is_success());
        assert_eq!(report.outcome(Stage::Members), Some(&StageOutcome::Fresh));
        assert_eq!(report.outcome(Stage::Attendance), None);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Attendance.to_string(), "attendance");
        assert_eq!(Stage::from_table(Table::Members), Some(Stage::Members));
        assert_eq!(Stage::from_table(Table::MigrationKv), None);
    }
}
