// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Display age with the adult privacy rule.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Ages at or above this show as `Adult`.
pub const ADULT_AGE: i32 = 18;

/// Parse the date formats the backend and older caches emit.
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Whole years between `dob` and `today`, or `None` if `dob` is in the future.
#[must_use]
pub fn age_in_years(dob: NaiveDate, today: NaiveDate) -> Option<i32> {
    if dob > today {
        return None;
    }
    let mut years = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    Some(years)
}

/// `"Adult"` for 18 and over, the exact age below that, empty when the
/// date of birth is missing or unparseable.
#[must_use]
pub fn display_age(dob: &str, today: NaiveDate) -> String {
    match parse_date(dob).and_then(|d| age_in_years(d, today)) {
        Some(years) if years >= ADULT_AGE => "Adult".to_string(),
        Some(years) => years.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_minor_shows_exact_age() {
        assert_eq!(display_age("2015-06-01", day(2024, 5, 31)), "8");
        assert_eq!(display_age("2015-06-01", day(2024, 6, 1)), "9");
    }

    #[test]
    fn test_adult_is_masked() {
        assert_eq!(display_age("2006-01-20", day(2024, 1, 20)), "Adult");
        assert_eq!(display_age("1980-03-03", day(2024, 1, 20)), "Adult");
    }

    #[test]
    fn test_day_before_eighteenth_birthday() {
        assert_eq!(display_age("2006-01-21", day(2024, 1, 20)), "17");
    }

    #[test]
    fn test_invalid_or_empty_is_blank() {
        let today = day(2024, 1, 20);
        assert_eq!(display_age("", today), "");
        assert_eq!(display_age("   ", today), "");
        assert_eq!(display_age("not a date", today), "");
        assert_eq!(display_age("2030-01-01", today), "");
    }

    #[test]
    fn test_alternate_formats() {
        let today = day(2024, 1, 20);
        assert_eq!(display_age("20/01/2016", today), "8");
        assert_eq!(display_age("2016-01-20T00:00:00", today), "8");
        assert_eq!(display_age("2016-01-20T00:00:00.000Z", today), "8");
    }
}
