// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Classification of free-text medical and consent fields.
//!
//! Exports, summaries, sorting and colouring all key off the same four
//! states, so the classifier is a pure function of the value, the field
//! name, and (for date fields) the reference day.
//!
//! # Example
//!
//! ```
//! use scout_sync::medical::{classify_at, MedicalStatus};
//! use chrono::NaiveDate;
//!
//! let today = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
//! assert_eq!(classify_at("", "allergies", today), MedicalStatus::Missing);
//! assert_eq!(classify_at("No allergies", "allergies", today), MedicalStatus::ConfirmedNone);
//! assert_eq!(classify_at("Peanuts", "allergies", today), MedicalStatus::HasData);
//! // the swimmer field is inverted
//! assert_eq!(classify_at("No", "swimmer", today), MedicalStatus::HasData);
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::normalize::parse_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalStatus {
    /// Nothing recorded
    Missing,
    /// Explicitly recorded as nothing to report
    ConfirmedNone,
    /// Something the leader must read
    HasData,
    /// A placeholder the form wrote, not an answer
    SystemDefault,
}

impl MedicalStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::ConfirmedNone => "confirmed_none",
            Self::HasData => "has_data",
            Self::SystemDefault => "system_default",
        }
    }

    /// Placeholders count as missing for every downstream purpose.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing | Self::SystemDefault)
    }

    /// Sort order for "most important first" listings.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::HasData => 0,
            Self::Missing => 1,
            Self::SystemDefault => 2,
            Self::ConfirmedNone => 3,
        }
    }
}

/// Field-specific interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Standard,
    /// `yes` is benign; `no` and absence are the risk
    Swimmer,
    /// A date; stale confirmations need attention
    ParentalConfirmation,
}

impl FieldRule {
    #[must_use]
    pub fn for_field(field: &str) -> Self {
        let name = field.trim().to_ascii_lowercase();
        if name.contains("swimmer") {
            Self::Swimmer
        } else if name.contains("confirmed_by_parents") || name.contains("parents_confirmed") {
            Self::ParentalConfirmation
        } else {
            Self::Standard
        }
    }
}

/// Placeholders emitted by forms and older exports.
const SYSTEM_DEFAULTS: &[&str] = &[
    "default", "please select", "select", "select...", "-", "--", "---",
    "not specified", "undefined", "null",
];

/// Short answers meaning "nothing to report"; matched exactly.
const NONE_TOKENS: &[&str] = &[
    "none", "nil", "no", "n/a", "na", "nothing", "nope", "n.a.", "none known",
];

/// Phrases meaning "nothing to report"; matched on word boundaries.
const NONE_PHRASES: &[&str] = &[
    "no allergies",
    "no known allergies",
    "no allergy",
    "no medical issues",
    "no medical conditions",
    "no medical needs",
    "no medication",
    "no dietary requirements",
    "no issues",
    "nothing to declare",
    "not applicable",
];

const CONFIRMATION_MAX_AGE_DAYS: i64 = 365;

fn normalise(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    collapsed.trim_end_matches(['.', '!']).to_string()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(phrase).any(|(start, _)| {
        let before_ok = haystack[..start].chars().next_back().map_or(true, |c| !is_word(c));
        let after_ok = haystack[start + phrase.len()..].chars().next().map_or(true, |c| !is_word(c));
        before_ok && after_ok
    })
}

/// Classify `value` as recorded for `field`, relative to `today`.
#[must_use]
pub fn classify_at(value: &str, field: &str, today: NaiveDate) -> MedicalStatus {
    let raw = value.trim();
    if raw.is_empty() {
        return MedicalStatus::Missing;
    }
    let text = normalise(raw);
    if SYSTEM_DEFAULTS.contains(&text.as_str()) || SYSTEM_DEFAULTS.contains(&raw.to_lowercase().as_str()) {
        return MedicalStatus::SystemDefault;
    }

    match FieldRule::for_field(field) {
        FieldRule::Swimmer => match text.as_str() {
            "yes" | "y" => MedicalStatus::ConfirmedNone,
            _ => MedicalStatus::HasData,
        },
        FieldRule::ParentalConfirmation => match parse_date(raw) {
            Some(date) if (today - date).num_days() > CONFIRMATION_MAX_AGE_DAYS => MedicalStatus::HasData,
            Some(_) => MedicalStatus::ConfirmedNone,
            None => MedicalStatus::HasData,
        },
        FieldRule::Standard => {
            if NONE_TOKENS.contains(&text.as_str())
                || NONE_PHRASES.iter().any(|p| contains_phrase(&text, p))
            {
                MedicalStatus::ConfirmedNone
            } else {
                MedicalStatus::HasData
            }
        }
    }
}

/// Classify against today's UTC date.
#[must_use]
pub fn classify(value: &str, field: &str) -> MedicalStatus {
    classify_at(value, field, chrono::Utc::now().date_naive())
}
