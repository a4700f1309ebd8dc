// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sections, events, attendance and the signed-in user.

use std::collections::{BTreeMap, HashMap};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{AttendanceRecord, CurrentUser, Entity, Event, EventRef, Section, StatusCounts};
use super::{envelope_rows, scalar_text, RawRow};

/// Keep the last occurrence of each key, preserving first-seen order.
#[must_use]
pub fn dedupe_by_key<T: Entity>(items: Vec<T>) -> Vec<T> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let key = item.key();
        if let Some(&i) = position.get(&key) {
            out[i] = item;
        } else {
            position.insert(key, out.len());
            out.push(item);
        }
    }
    out
}

fn permission_level(row: &RawRow) -> Option<u32> {
    match row.fields.get("permissions").or_else(|| row.fields.get("permission_level")) {
        Some(Value::Number(n)) => n.as_u64().map(|v| v as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        // Per-area permission map: the section's level is the highest grant.
        Some(Value::Object(areas)) => areas
            .values()
            .filter_map(|v| scalar_text(v).and_then(|t| t.parse::<u32>().ok()))
            .max(),
        _ => None,
    }
}

pub fn normalize_sections(payload: &Value) -> Result<Vec<Section>, SyncError> {
    let sections = envelope_rows(payload)?
        .iter()
        .filter_map(|row| {
            let id = row.id(&["sectionid", "section_id", "id"])?;
            Some(Section {
                name: row.text(&["sectionname", "section_name", "name"]).unwrap_or_else(|| id.clone()),
                section_type: row
                    .text(&["section", "sectiontype", "section_type", "type"])
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_default(),
                permission_level: permission_level(row),
                id,
            })
        })
        .collect();
    Ok(dedupe_by_key(sections))
}

fn date_time(row: &RawRow, date_fields: &[&str], time_fields: &[&str]) -> Option<String> {
    let date = row.text(date_fields)?;
    match row.text(time_fields) {
        Some(time) if !date.contains('T') && time != "00:00:00" => Some(format!("{}T{}", date, time)),
        _ => Some(date),
    }
}

/// Events of one section. Rows naming a different section keep their own.
pub fn normalize_events(payload: &Value, section_id: &str) -> Result<Vec<Event>, SyncError> {
    let events = envelope_rows(payload)?
        .iter()
        .filter_map(|row| {
            let id = row.id(&["eventid", "event_id", "id"])?;
            Some(Event {
                section_id: row
                    .text(&["sectionid", "section_id"])
                    .unwrap_or_else(|| section_id.to_string()),
                name: row.text(&["name", "eventname"]).unwrap_or_default(),
                start: date_time(row, &["startdate", "start_date", "start"], &["starttime", "start_time"]),
                end: date_time(row, &["enddate", "end_date", "end"], &["endtime", "end_time"]),
                location: row.text(&["location"]),
                notes: row.text(&["notes"]),
                id,
            })
        })
        .collect();
    Ok(dedupe_by_key(events))
}

const ATTENDANCE_CORE: &[&str] = &[
    "scoutid", "member_id", "memberId", "attending", "firstname", "lastname",
    "first_name", "last_name", "eventid", "sectionid",
];

/// Attendance rows of one event.
pub fn normalize_attendance(payload: &Value, event: &EventRef) -> Result<Vec<AttendanceRecord>, SyncError> {
    let records = envelope_rows(payload)?
        .iter()
        .filter_map(|row| {
            let member_id = row.numeric_id(&["scoutid", "member_id", "memberId"])?;
            let attending = row.text(&["attending"]).unwrap_or_default();
            let extra: BTreeMap<String, String> = row
                .fields
                .iter()
                .filter(|(k, _)| !ATTENDANCE_CORE.contains(&k.as_str()))
                .filter_map(|(k, v)| scalar_text(v).map(|t| (k.clone(), t)))
                .collect();
            Some(AttendanceRecord {
                event_id: event.event_id.clone(),
                section_id: event.section_id.clone(),
                member_id,
                counts: StatusCounts::from_attending(&attending),
                extra,
            })
        })
        .collect();
    Ok(dedupe_by_key(records))
}

/// The `/api/auth/user` response, bare or wrapped in `data`.
pub fn normalize_current_user(payload: &Value) -> Result<CurrentUser, SyncError> {
    let obj = match payload.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => payload
            .as_object()
            .ok_or_else(|| SyncError::DecodeError("user payload is not an object".to_string()))?,
    };
    let row = RawRow { key: None, fields: obj.clone() };
    Ok(CurrentUser {
        id: row.text(&["userid", "user_id", "id"]).unwrap_or_default(),
        first_name: row.text(&["firstname", "first_name", "firstName"]).unwrap_or_default(),
        last_name: row.text(&["lastname", "last_name", "lastName"]).unwrap_or_default(),
        email: row.text(&["email"]),
    })
}
