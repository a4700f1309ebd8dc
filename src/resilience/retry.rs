// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for transient failures.
//!
//! Two flavours:
//! - [`retry`]: plain exponential backoff, used when opening local storage.
//! - [`retry_remote`]: the bounded, hint-aware policy the sync engine wraps
//!   around every adapter call. Rate-limit waits follow the server's hint
//!   (with jitter); network and 5xx failures back off exponentially; every
//!   other error returns immediately. Waits abort when the session logs out.
//!
//! # Example
//!
//! ```
//! use scout_sync::resilience::retry::RetryConfig;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//! ```

use std::future::Future;
use std::time::Duration;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::error::SyncError;

/// Backoff settings for local operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: usize,
}

impl RetryConfig {
    /// Fast-fail retry for opening storage.
    /// Attempts 5 times with exponential backoff, failing after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(err);
                }
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, config.max_retries, err, delay
                );
                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

/// Cancellation source: the value changes when waits must abort (logout).
pub type CancelSignal = watch::Receiver<u64>;

/// Sleep for `duration` unless the signal fires first.
///
/// Returns `false` when cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: Option<&mut CancelSignal>) -> bool {
    match cancel {
        Some(rx) => {
            let deadline = tokio::time::Instant::now() + duration;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => true,
                changed = rx.changed() => {
                    if changed.is_ok() {
                        return false;
                    }
                    // sender gone: nothing can cancel any more
                    tokio::time::sleep_until(deadline).await;
                    true
                }
            }
        }
        None => {
            sleep(duration).await;
            true
        }
    }
}

/// Scale a server hint by a random factor within `±jitter_pct` percent.
#[must_use]
pub fn jittered(hint: Duration, jitter_pct: u32) -> Duration {
    if jitter_pct == 0 {
        return hint;
    }
    let pct = jitter_pct.min(100) as i64;
    let offset = rand::thread_rng().gen_range(-pct..=pct);
    let factor = (100 + offset) as f64 / 100.0;
    Duration::try_from_secs_f64(hint.as_secs_f64() * factor).unwrap_or(hint)
}

/// How long to wait before retrying `err`, or `None` if it is not retryable.
fn retry_delay(err: &SyncError, policy: &RetryPolicy, retry_index: u32) -> Option<Duration> {
    match err {
        SyncError::RateLimited(hint) => Some(jittered(*hint, policy.jitter_pct)),
        e if e.is_transient() => {
            let base = Duration::from_millis(policy.backoff_ms);
            Some(base.saturating_mul(2u32.saturating_pow(retry_index)))
        }
        _ => None,
    }
}

/// Run a remote operation under the engine's bounded retry policy.
///
/// At most `1 + policy.max_attempts` dispatches. Only the final exhausted
/// error is returned. A cancelled wait yields [`SyncError::TokenExpired`].
pub async fn retry_remote<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut cancel: Option<CancelSignal>,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut retries = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!(operation = operation_name, retries, "Remote call recovered");
                }
                return Ok(val);
            }
            Err(err) => {
                let Some(delay) = retry_delay(&err, policy, retries as u32) else {
                    return Err(err);
                };
                if retries >= policy.max_attempts {
                    warn!(operation = operation_name, error = %err, "Retry budget exhausted");
                    return Err(err);
                }
                retries += 1;
                warn!(
                    operation = operation_name,
                    attempt = retries,
                    max = policy.max_attempts,
                    error = %err,
                    "Remote call failed, retrying in {:?}",
                    delay
                );
                if !sleep_or_cancel(delay, cancel.as_mut()).await {
                    info!(operation = operation_name, "Retry wait cancelled");
                    return Err(SyncError::TokenExpired);
                }
            }
        }
    }
}
