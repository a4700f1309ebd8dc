// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the data layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `scout_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `endpoint`: sections, members, events, attendance, user, auth_callback
//! - `stage`: sections, members, events, attendance
//! - `outcome`: success, or an error kind (`rate_limited`, `unauthorized`, ...)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::auth::AuthState;

/// Record an adapter request and how it ended
pub fn record_request(endpoint: &str, outcome: &str) {
    counter!(
        "scout_sync_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record adapter request latency
pub fn record_request_latency(endpoint: &str, duration: Duration) {
    histogram!(
        "scout_sync_request_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a 429 and the hinted wait
pub fn record_rate_limited(endpoint: &str, retry_after: Duration) {
    counter!(
        "scout_sync_rate_limited_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
    histogram!("scout_sync_rate_limit_wait_seconds").record(retry_after.as_secs_f64());
}

/// Record a request refused before dispatch
pub fn record_blocked() {
    counter!("scout_sync_blocked_requests_total").increment(1);
}

/// Record a pipeline stage outcome
pub fn record_stage(stage: &str, outcome: &str) {
    counter!(
        "scout_sync_stages_total",
        "stage" => stage.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record pipeline stage duration
pub fn record_stage_latency(stage: &str, duration: Duration) {
    histogram!(
        "scout_sync_stage_seconds",
        "stage" => stage.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows upserted into a table
pub fn record_rows_written(table: &str, count: usize) {
    counter!(
        "scout_sync_rows_written_total",
        "table" => table.to_string()
    )
    .increment(count as u64);
}

/// Record a coalesced refresh request (joined an existing run)
pub fn record_coalesced() {
    counter!("scout_sync_coalesced_refresh_total").increment(1);
}

/// Set whether a sync run is in flight (0/1)
pub fn set_sync_active(active: bool) {
    gauge!("scout_sync_active").set(if active { 1.0 } else { 0.0 });
}

/// Set auth state as a numeric gauge
/// (0 = no_data, 1 = cached_only, 2 = authenticated, 3 = token_expired, 4 = syncing)
pub fn set_auth_state(state: AuthState) {
    let value = match state {
        AuthState::NoData => 0.0,
        AuthState::CachedOnly => 1.0,
        AuthState::Authenticated => 2.0,
        AuthState::TokenExpired => 3.0,
        AuthState::Syncing => 4.0,
    };
    gauge!("scout_sync_auth_state").set(value);
}

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "scout_sync_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Times a request and records latency on drop
pub struct LatencyTimer {
    endpoint: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_request_latency(self.endpoint, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic with no recorder installed.
    // tests/integration.rs asserts values through metrics-util.

    #[test]
    fn test_request_metrics() {
        record_request("members", "success");
        record_request("events", "rate_limited");
        record_request_latency("sections", Duration::from_millis(12));
        record_rate_limited("events", Duration::from_secs(60));
        record_blocked();
    }

    #[test]
    fn test_stage_metrics() {
        record_stage("members", "synced");
        record_stage_latency("attendance", Duration::from_millis(300));
        record_rows_written("members", 42);
        record_coalesced();
        set_sync_active(true);
        set_sync_active(false);
    }

    #[test]
    fn test_auth_gauge() {
        set_auth_state(AuthState::Authenticated);
        set_auth_state(AuthState::TokenExpired);
    }

    #[test]
    fn test_latency_timer_drop() {
        let timer = LatencyTimer::new("user");
        drop(timer);
        record_error("store", "put_many", "storage_unavailable");
    }
}
