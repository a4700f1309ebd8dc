// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Global dispatch gate shared by every adapter call.
//!
//! Three limits apply to every dispatch, from any stage of any run:
//!
//! - at most `max_concurrent` requests in flight (semaphore permits)
//! - at least `min_interval` between consecutive dispatch starts
//! - no dispatch at all before `paused_until`, which a 429 pushes forward
//!
//! The gate reads `tokio::time::Instant`, so paused-clock tests drive it.

use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::SyncError;

#[derive(Debug)]
struct Schedule {
    next_slot: Option<Instant>,
    paused_until: Option<Instant>,
}

#[derive(Debug)]
pub struct RateGate {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    schedule: Mutex<Schedule>,
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateGate {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            min_interval: Duration::from_millis(config.min_interval_ms),
            schedule: Mutex::new(Schedule { next_slot: None, paused_until: None }),
        }
    }

    /// Wait for a concurrency slot and a dispatch time.
    pub async fn acquire(&self) -> Result<GatePermit, SyncError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::NetworkUnavailable("rate gate closed".into()))?;

        loop {
            let wait_until = {
                let mut schedule = self.schedule.lock();
                let now = Instant::now();
                let earliest = [schedule.next_slot, schedule.paused_until]
                    .into_iter()
                    .flatten()
                    .max();
                match earliest {
                    Some(at) if at > now => Some(at),
                    _ => {
                        schedule.next_slot = Some(now + self.min_interval);
                        None
                    }
                }
            };
            match wait_until {
                // the pause may have moved while we slept, so re-check
                Some(at) => sleep_until(at).await,
                None => return Ok(GatePermit { _permit: permit }),
            }
        }
    }

    /// Hold every dispatch for `duration` from now. Never shortens a pause.
    pub fn pause_for(&self, duration: Duration) {
        let now = Instant::now();
        let until = now.checked_add(duration).unwrap_or(now + Duration::from_secs(86_400));
        let mut schedule = self.schedule.lock();
        if schedule.paused_until.map_or(true, |current| current < until) {
            debug!(pause_ms = duration.as_millis() as u64, "Rate gate paused");
            schedule.paused_until = Some(until);
        }
    }

    /// Time left on the current pause, if any.
    #[must_use]
    pub fn paused_for(&self) -> Option<Duration> {
        let now = Instant::now();
        self.schedule
            .lock()
            .paused_until
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
