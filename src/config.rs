// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the data layer.
//!
//! # Example
//!
//! ```
//! use scout_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.freshness_window_ms, 15 * 60 * 1000);
//!
//! // Overrides, using the same keys the web console uses
//! let config = SyncConfig::from_json(r#"{
//!     "backendUrl": "https://console.example.org",
//!     "freshnessWindowMs": 60000,
//!     "rateLimit": { "minIntervalMs": 500 }
//! }"#).unwrap();
//! assert_eq!(config.rate_limit.min_interval_ms, 500);
//! assert_eq!(config.rate_limit.max_concurrent, 3);
//! ```

use std::time::Duration;
use serde::Deserialize;

use crate::error::SyncError;

/// Configuration for the data layer.
///
/// All fields have defaults. Production deployments should at least set
/// `backend_url` to the backend proxy the console is served from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Backend proxy base URL. Requests to any other host are blocked.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// How long a synced kind stays current (per kind)
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: u64,

    /// Global dispatcher limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry budget for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Credential is treated as expired this long before its real expiry
    #[serde(default = "default_token_skew_ms")]
    pub token_skew_ms: u64,

    /// Per-request deadline
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,

    /// Fan-out bound within a single stage
    #[serde(default = "default_stage_concurrency")]
    pub stage_concurrency: usize,

    /// Delay between consecutive dispatches within a stage
    #[serde(default = "default_stage_delay_ms")]
    pub stage_delay_ms: u64,

    /// Retry-after used when a 429 carries no hint
    #[serde(default = "default_rate_limit_default_ms")]
    pub rate_limit_default_ms: u64,

    /// Upper bound on any server retry-after hint
    #[serde(default = "default_rate_limit_max_ms")]
    pub rate_limit_max_ms: u64,

    /// Term forwarded to the member grid endpoint
    #[serde(default)]
    pub term_id: Option<String>,
}

/// Token-bucket settings shared by every stage of every sync.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

/// Bounded retry for transient failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Jitter applied to rate-limit waits, as a percentage either way
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u32,
    /// First backoff for network/server failures
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backend_url() -> String { "http://localhost:3000".to_string() }
fn default_freshness_window_ms() -> u64 { 15 * 60 * 1000 } // 15 minutes
fn default_token_skew_ms() -> u64 { 30_000 }
fn default_request_deadline_ms() -> u64 { 30_000 }
fn default_stage_concurrency() -> usize { 3 }
fn default_stage_delay_ms() -> u64 { 200 }
fn default_rate_limit_default_ms() -> u64 { 60_000 }
fn default_rate_limit_max_ms() -> u64 { 5 * 60 * 1000 }
fn default_min_interval_ms() -> u64 { 200 }
fn default_max_concurrent() -> usize { 3 }
fn default_max_attempts() -> usize { 3 }
fn default_jitter_pct() -> u32 { 20 }
fn default_backoff_ms() -> u64 { 500 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            freshness_window_ms: default_freshness_window_ms(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            token_skew_ms: default_token_skew_ms(),
            request_deadline_ms: default_request_deadline_ms(),
            stage_concurrency: default_stage_concurrency(),
            stage_delay_ms: default_stage_delay_ms(),
            rate_limit_default_ms: default_rate_limit_default_ms(),
            rate_limit_max_ms: default_rate_limit_max_ms(),
            term_id: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            jitter_pct: default_jitter_pct(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config document. Missing keys take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| SyncError::InvalidArgument(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.rate_limit.max_concurrent == 0 {
            return Err(SyncError::InvalidArgument("rateLimit.maxConcurrent must be > 0".into()));
        }
        if self.stage_concurrency == 0 {
            return Err(SyncError::InvalidArgument("stageConcurrency must be > 0".into()));
        }
        if self.rate_limit_max_ms == 0 {
            return Err(SyncError::InvalidArgument("rateLimitMaxMs must be > 0".into()));
        }
        if self.retry.jitter_pct > 100 {
            return Err(SyncError::InvalidArgument("retry.jitterPct must be <= 100".into()));
        }
        reqwest::Url::parse(&self.backend_url)
            .map_err(|e| SyncError::InvalidArgument(format!("backendUrl: {}", e)))?;
        Ok(())
    }

    #[must_use]
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    /// Longest the client will honour a 429 hint, default included.
    #[must_use]
    pub fn retry_after_cap(&self) -> Duration {
        Duration::from_millis(self.rate_limit_max_ms)
    }

    #[must_use]
    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }

    /// Fast settings for tests (tiny delays, no jitter).
    #[doc(hidden)]
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            rate_limit: RateLimitConfig { min_interval_ms: 0, max_concurrent: 3 },
            retry: RetryPolicy { max_attempts: 3, jitter_pct: 0, backoff_ms: 1 },
            stage_delay_ms: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.freshness_window_ms, 900_000);
        assert_eq!(config.rate_limit.min_interval_ms, 200);
        assert_eq!(config.rate_limit.max_concurrent, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.jitter_pct, 20);
        assert_eq!(config.token_skew_ms, 30_000);
        assert_eq!(config.request_deadline_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SyncConfig::from_json(r#"{"retry": {"maxAttempts": 5}}"#).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.jitter_pct, 20);
        assert_eq!(config.backend_url, "http://localhost:3000");
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = SyncConfig::from_json(r#"{"rateLimit": {"maxConcurrent": 0}}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[test]
    fn test_retry_after_cap() {
        assert_eq!(SyncConfig::default().retry_after_cap(), Duration::from_secs(300));
        let err = SyncConfig::from_json(r#"{"rateLimitMaxMs": 0}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_bad_backend_url() {
        let err = SyncConfig::from_json(r#"{"backendUrl": "not a url"}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }
}
