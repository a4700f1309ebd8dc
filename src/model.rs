// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical entity shapes.
//!
//! These are the normalised rows the store holds. Raw remote payloads are
//! coerced into them by [`crate::normalize`]; the facade reads them back out.
//!
//! # Example
//!
//! ```
//! use scout_sync::model::{Entity, Event, Table};
//!
//! let event = Event {
//!     id: "e1".into(),
//!     section_id: "49097".into(),
//!     name: "Camp".into(),
//!     start: Some("2024-01-20".into()),
//!     ..Default::default()
//! };
//! assert_eq!(event.key(), "49097:e1");
//! assert_eq!(Event::TABLE, Table::Events);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Logical tables in the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sections,
    Members,
    Events,
    Attendance,
    /// Legacy flat values rescued during migration
    MigrationKv,
}

impl Table {
    /// Tables holding synced entities (everything but `migration_kv`).
    pub const ENTITIES: [Table; 4] = [Table::Sections, Table::Members, Table::Events, Table::Attendance];

    pub const ALL: [Table; 5] = [
        Table::Sections,
        Table::Members,
        Table::Events,
        Table::Attendance,
        Table::MigrationKv,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sections => "sections",
            Self::Members => "members",
            Self::Events => "events",
            Self::Attendance => "attendance",
            Self::MigrationKv => "migration_kv",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A row type that lives in one store table under a stable key.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    const TABLE: Table;
    fn key(&self) -> String;
}

/// A sectional unit (Beavers, Cubs, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub name: String,
    /// Type tag, e.g. `beavers`, `cubs`, `waiting`
    #[serde(default)]
    pub section_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_level: Option<u32>,
}

impl Entity for Section {
    const TABLE: Table = Table::Sections;
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Grouped free-form fields: `group -> field -> value`.
pub type FieldGroups = BTreeMap<String, BTreeMap<String, String>>;

/// A young person or adult on a roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patrol: Option<String>,
    /// Display age: exact years under 18, `Adult` otherwise, empty when unknown
    #[serde(default)]
    pub age: String,
    /// Contact, consent and essential-information groups
    #[serde(default)]
    pub contact_groups: FieldGroups,
    /// Sections this member was seen in, `section id -> section name`
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
}

impl Member {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    #[must_use]
    pub fn section_ids(&self) -> BTreeSet<String> {
        self.sections.keys().cloned().collect()
    }

    #[must_use]
    pub fn section_names(&self) -> BTreeSet<String> {
        self.sections.values().cloned().collect()
    }

    #[must_use]
    pub fn field(&self, group: &str, field: &str) -> Option<&str> {
        self.contact_groups.get(group)?.get(field).map(String::as_str)
    }

    /// Fold another sighting of the same member into this one.
    ///
    /// Sections union; scalar fields take the newer non-empty value; groups
    /// merge field by field.
    pub fn merge_from(&mut self, other: Member) {
        debug_assert_eq!(self.id, other.id);
        if !other.first_name.is_empty() {
            self.first_name = other.first_name;
        }
        if !other.last_name.is_empty() {
            self.last_name = other.last_name;
        }
        if other.date_of_birth.is_some() {
            self.date_of_birth = other.date_of_birth;
            self.age = other.age;
        }
        if other.patrol.is_some() {
            self.patrol = other.patrol;
        }
        for (group, fields) in other.contact_groups {
            self.contact_groups.entry(group).or_default().extend(fields);
        }
        self.sections.extend(other.sections);
    }
}

impl Entity for Member {
    const TABLE: Table = Table::Members;
    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// A scheduled activity owned by a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub section_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Event {
    #[must_use]
    pub fn event_ref(&self) -> EventRef {
        EventRef { section_id: self.section_id.clone(), event_id: self.id.clone() }
    }
}

impl Entity for Event {
    const TABLE: Table = Table::Events;
    fn key(&self) -> String {
        format!("{}:{}", self.section_id, self.id)
    }
}

/// Identifies an event for attendance fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRef {
    pub section_id: String,
    pub event_id: String,
}

/// Attendance tallies. A single member's record has exactly one count set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub yes: u32,
    pub no: u32,
    pub invited: u32,
    pub not_invited: u32,
}

impl StatusCounts {
    /// Map an `attending` value to a one-hot count.
    #[must_use]
    pub fn from_attending(value: &str) -> Self {
        let mut counts = Self::default();
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" => counts.yes = 1,
            "no" => counts.no = 1,
            "invited" => counts.invited = 1,
            _ => counts.not_invited = 1,
        }
        counts
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.yes + self.no + self.invited + self.not_invited
    }

    /// Sum the counts of many records.
    #[must_use]
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        records.into_iter().fold(Self::default(), |acc, r| Self {
            yes: acc.yes + r.counts.yes,
            no: acc.no + r.counts.no,
            invited: acc.invited + r.counts.invited,
            not_invited: acc.not_invited + r.counts.not_invited,
        })
    }
}

/// One member's attendance for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub event_id: String,
    pub section_id: String,
    pub member_id: u64,
    pub counts: StatusCounts,
    /// Free-form side data (custom columns)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Entity for AttendanceRecord {
    const TABLE: Table = Table::Attendance;
    fn key(&self) -> String {
        format!("{}:{}", self.event_id, self.member_id)
    }
}

/// Per-table synchronisation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    #[serde(default)]
    pub last_sync_ms: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncMeta {
    /// Whether this kind was synced within `window_ms` of `now_ms`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64, window_ms: u64) -> bool {
        match self.last_sync_ms {
            Some(last) => now_ms.saturating_sub(last) < window_ms as i64,
            None => false,
        }
    }
}

/// The signed-in leader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
