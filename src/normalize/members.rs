// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Member roster normalisation.
//!
//! Grid rows carry qualified field names such as
//! `contact_primary_member__email`. Everything before the first `__` is the
//! group, the rest is the field. Groups may also arrive already nested as an
//! object of scalars. `permissions` is the older name of `consents`; both
//! land in `consents`.

use std::collections::{BTreeMap, HashMap};
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{FieldGroups, Member, Section};
use super::{display_age, envelope_rows, scalar_text, RawRow};

const ID_FIELDS: &[&str] = &["scoutid", "member_id", "memberId", "id"];
const FIRST_NAME_FIELDS: &[&str] = &["firstname", "first_name", "firstName"];
const LAST_NAME_FIELDS: &[&str] = &["lastname", "last_name", "lastName"];
const DOB_FIELDS: &[&str] = &["dob", "date_of_birth", "dateOfBirth"];
const PATROL_FIELDS: &[&str] = &["patrol", "patrol_name"];
const SECTION_ID_FIELDS: &[&str] = &["sectionid", "section_id", "sectionId"];
const SECTION_NAME_FIELDS: &[&str] = &["sectionname", "section_name", "sectionName"];

/// Top-level keys that are entity attributes, not contact groups.
const RESERVED: &[&str] = &[
    "scoutid", "member_id", "memberId", "id", "firstname", "first_name", "firstName",
    "lastname", "last_name", "lastName", "dob", "date_of_birth", "dateOfBirth",
    "patrol", "patrol_name", "sectionid", "section_id", "sectionId", "sectionname",
    "section_name", "sectionName", "sections", "age", "contactGroups",
];

/// Canonical group name (lower-cased, aliases folded).
#[must_use]
pub fn group_name(raw: &str) -> String {
    let name = raw.trim().to_ascii_lowercase();
    match name.as_str() {
        "permissions" => "consents".to_string(),
        _ => name,
    }
}

fn collect_groups(row: &RawRow) -> FieldGroups {
    let mut groups: FieldGroups = BTreeMap::new();
    for (key, value) in &row.fields {
        if RESERVED.contains(&key.as_str()) {
            continue;
        }
        if let Some((group, field)) = key.split_once("__") {
            if let Some(text) = scalar_text(value) {
                groups.entry(group_name(group)).or_default().insert(field.to_string(), text);
            }
        } else if let Value::Object(nested) = value {
            let fields: BTreeMap<String, String> = nested
                .iter()
                .filter_map(|(f, v)| scalar_text(v).map(|t| (f.clone(), t)))
                .collect();
            if !fields.is_empty() {
                groups.entry(group_name(key)).or_default().extend(fields);
            }
        }
    }
    groups
}

fn member_from_row(row: &RawRow, section: &Section, today: NaiveDate) -> Option<Member> {
    let id = row.numeric_id(ID_FIELDS)?;
    let date_of_birth = row.text(DOB_FIELDS);
    let age = date_of_birth.as_deref().map(|d| display_age(d, today)).unwrap_or_default();

    let mut sections = BTreeMap::new();
    if !section.id.is_empty() {
        sections.insert(section.id.clone(), section.name.clone());
    } else if let Some(sid) = row.text(SECTION_ID_FIELDS) {
        sections.insert(sid, row.text(SECTION_NAME_FIELDS).unwrap_or_default());
    }

    Some(Member {
        id,
        first_name: row.text(FIRST_NAME_FIELDS).unwrap_or_default(),
        last_name: row.text(LAST_NAME_FIELDS).unwrap_or_default(),
        date_of_birth,
        patrol: row.text(PATROL_FIELDS),
        age,
        contact_groups: collect_groups(row),
        sections,
    })
}

/// Normalise one section's roster payload.
///
/// Rows without a numeric id are dropped. Duplicates within the payload
/// merge. `today` feeds the display age.
pub fn normalize_members(
    payload: &Value,
    section: &Section,
    today: NaiveDate,
) -> Result<Vec<Member>, SyncError> {
    let rows = envelope_rows(payload)?;
    let members = rows.iter().filter_map(|row| member_from_row(row, section, today));
    Ok(merge_members(members))
}

/// De-duplicate by id, merging repeated sightings (sections set-union).
/// Output is ordered by id.
#[must_use]
pub fn merge_members(members: impl IntoIterator<Item = Member>) -> Vec<Member> {
    let mut by_id: HashMap<u64, Member> = HashMap::new();
    for member in members {
        match by_id.get_mut(&member.id) {
            Some(existing) => existing.merge_from(member),
            None => {
                by_id.insert(member.id, member);
            }
        }
    }
    let mut merged: Vec<Member> = by_id.into_values().collect();
    merged.sort_by_key(|m| m.id);
    merged
}
