// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for normalisation and classification.
//!
//! Uses proptest to generate random and malformed payloads and verify the
//! normalisers never panic, only return clean errors, and that member
//! merging obeys its laws whichever envelope the rows arrive in.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{BTreeMap, BTreeSet};
use chrono::NaiveDate;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use scout_sync::model::{EventRef, Section};
use scout_sync::normalize::{
    display_age, envelope_rows, merge_members, normalize_attendance, normalize_events, normalize_members,
    normalize_sections,
};
use scout_sync::{classify_at, MedicalStatus, SyncError};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Payloads shaped like an envelope but with random innards.
fn envelope_like_strategy() -> impl Strategy<Value = Value> {
    (prop_oneof![Just("items"), Just("data"), Just("other")], arbitrary_json_strategy())
        .prop_map(|(key, inner)| {
            let mut envelope = Map::new();
            envelope.insert("identifier".to_string(), json!("scoutid"));
            envelope.insert(key.to_string(), inner);
            Value::Object(envelope)
        })
}

/// A roster: member ids per section, drawn from a small pool so ids repeat.
fn roster_strategy() -> impl Strategy<Value = Vec<(String, Vec<u64>)>> {
    prop::collection::vec(
        ("[1-9][0-9]{0,4}", prop::collection::vec(1u64..20, 0..8)),
        1..5,
    )
}

fn section(id: &str) -> Section {
    Section { id: id.to_string(), name: format!("Section {}", id), ..Section::default() }
}

/// Encode one section's rows in the list or keyed envelope.
fn envelope(ids: &[u64], keyed: bool) -> Value {
    if keyed {
        let data: Map<String, Value> = ids
            .iter()
            .map(|id| (id.to_string(), json!({"firstname": format!("M{}", id)})))
            .collect();
        json!({"identifier": "scoutid", "data": data})
    } else {
        let items: Vec<Value> = ids.iter().map(|id| json!({"scoutid": id, "firstname": format!("M{}", id)})).collect();
        json!({"identifier": "scoutid", "items": items})
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
}

// =============================================================================
// Normaliser robustness
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn envelope_rows_never_panics(payload in arbitrary_json_strategy()) {
        if let Err(e) = envelope_rows(&payload) {
            prop_assert!(matches!(e, SyncError::DecodeError(_)));
        }
    }

    #[test]
    fn normalisers_never_panic(payload in envelope_like_strategy()) {
        let event = EventRef { section_id: "1".into(), event_id: "e1".into() };
        let outcomes = [
            normalize_sections(&payload).err(),
            normalize_events(&payload, "1").err(),
            normalize_members(&payload, &section("1"), today()).err(),
            normalize_attendance(&payload, &event).err(),
        ];
        for err in outcomes.into_iter().flatten() {
            prop_assert!(matches!(err, SyncError::DecodeError(_)));
        }
    }

    #[test]
    fn members_dedupe_and_union_sections(roster in roster_strategy(), keyed in prop::collection::vec(any::<bool>(), 5)) {
        let mut fetched = Vec::new();
        let mut expected: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();

        for (i, (section_id, ids)) in roster.iter().enumerate() {
            let sec = section(section_id);
            let payload = envelope(ids, keyed[i % keyed.len()]);
            fetched.extend(normalize_members(&payload, &sec, today()).unwrap());
            for id in ids {
                expected.entry(*id).or_default().insert(sec.name.clone());
            }
        }

        let merged = merge_members(fetched);
        let ids: Vec<u64> = merged.iter().map(|m| m.id).collect();
        let unique: BTreeSet<u64> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len());
        prop_assert_eq!(unique, expected.keys().copied().collect::<BTreeSet<_>>());
        for member in &merged {
            prop_assert_eq!(&member.section_names(), &expected[&member.id]);
        }
    }

    #[test]
    fn merge_is_order_independent(roster in roster_strategy()) {
        let mut fetched = Vec::new();
        for (section_id, ids) in &roster {
            fetched.extend(normalize_members(&envelope(ids, false), &section(section_id), today()).unwrap());
        }
        let forward = merge_members(fetched.clone());
        fetched.reverse();
        let backward = merge_members(fetched);

        let sections = |members: &[scout_sync::model::Member]| -> Vec<(u64, BTreeSet<String>)> {
            members.iter().map(|m| (m.id, m.section_ids())).collect()
        };
        prop_assert_eq!(sections(&forward), sections(&backward));
    }
}

// =============================================================================
// Classification and age
// =============================================================================

proptest! {
    #[test]
    fn classify_is_pure(value in ".{0,40}", field in prop_oneof![
        Just("allergies".to_string()),
        Just("swimmer".to_string()),
        Just("confirmed_by_parents".to_string()),
        "[a-z_]{1,20}",
    ]) {
        let first = classify_at(&value, &field, today());
        let second = classify_at(&value, &field, today());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn whitespace_only_is_missing(value in "[ \t\n]{0,10}", field in "[a-z_]{1,20}") {
        prop_assert_eq!(classify_at(&value, &field, today()), MedicalStatus::Missing);
    }

    #[test]
    fn swimmer_is_binary(value in "[A-Za-z]{1,10}") {
        let status = classify_at(&value, "swimmer", today());
        prop_assert!(matches!(status, MedicalStatus::ConfirmedNone | MedicalStatus::HasData | MedicalStatus::SystemDefault));
    }

    #[test]
    fn display_age_respects_privacy(days_old in 0i64..40_000) {
        let dob = today() - chrono::Duration::days(days_old);
        let shown = display_age(&dob.format("%Y-%m-%d").to_string(), today());
        match shown.parse::<i32>() {
            Ok(years) => prop_assert!((0..18).contains(&years)),
            Err(_) => prop_assert_eq!(shown, "Adult"),
        }
    }

    #[test]
    fn display_age_of_garbage_is_empty(raw in "[a-z ]{0,12}") {
        prop_assert_eq!(display_age(&raw, today()), "");
    }
}

// =============================================================================
// Edge cases the strategies rarely hit
// =============================================================================

#[test]
fn future_date_of_birth_shows_nothing() {
    assert_eq!(display_age("2030-01-01", today()), "");
}

#[test]
fn empty_envelopes_are_empty() {
    assert!(envelope_rows(&json!({"items": []})).unwrap().is_empty());
    assert!(envelope_rows(&json!({"data": {}})).unwrap().is_empty());
    assert!(envelope_rows(&Value::Null).unwrap().is_empty());
}

#[test]
fn scalar_payload_is_decode_error() {
    assert!(matches!(envelope_rows(&json!(42)), Err(SyncError::DecodeError(_))));
    assert!(matches!(envelope_rows(&json!("items")), Err(SyncError::DecodeError(_))));
}
