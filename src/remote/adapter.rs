// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed access to the backend proxy.
//!
//! Every call passes the same checks in order:
//!
//! ```text
//! resolve URL ──► same origin as backend? ──no──► Blocked (nothing sent)
//!                          │ yes
//!                          ▼
//!                   RateGate::acquire
//!                          │
//!                          ▼
//!             transport.send (under deadline) ──► status mapping ──► decode
//! ```
//!
//! The adapter never retries and never touches the token store. A 429
//! pauses the shared gate for the hinted window and is reported as
//! [`SyncError::RateLimited`]; what happens next is the engine's call.

use std::sync::Arc;
use std::time::Duration;
use chrono::NaiveDate;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AuthGrant, Credential};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::{self, LatencyTimer};
use crate::model::{AttendanceRecord, CurrentUser, Event, EventRef, Member, Section};
use crate::normalize;

use super::gate::RateGate;
use super::transport::{HttpRequest, HttpResponse, Transport};

pub const SECTIONS_PATH: &str = "/api/ext/sections/";
pub const MEMBERS_PATH: &str = "/api/ext/members/contact/grid/";
pub const EVENTS_PATH: &str = "/api/ext/events/";
pub const ATTENDANCE_PATH: &str = "/api/ext/events/event/attendance/";
pub const USER_PATH: &str = "/api/auth/user";
pub const CALLBACK_PATH: &str = "/api/auth/callback";

pub struct RemoteAdapter {
    base: Url,
    transport: Arc<dyn Transport>,
    gate: Arc<RateGate>,
    deadline: Duration,
    default_retry_after: Duration,
    max_retry_after: Duration,
    term_id: Option<String>,
}

impl RemoteAdapter {
    pub fn new(config: &SyncConfig, transport: Arc<dyn Transport>) -> Result<Self, SyncError> {
        let base = Url::parse(&config.backend_url)
            .map_err(|e| SyncError::InvalidArgument(format!("backendUrl: {}", e)))?;
        Ok(Self {
            base,
            transport,
            gate: Arc::new(RateGate::new(&config.rate_limit)),
            deadline: config.request_deadline(),
            default_retry_after: Duration::from_millis(config.rate_limit_default_ms),
            max_retry_after: config.retry_after_cap(),
            term_id: config.term_id.clone(),
        })
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    #[must_use]
    pub fn backend(&self) -> &Url {
        &self.base
    }

    /// Resolve `target` against the backend. Anything that lands on another
    /// origin is refused before dispatch.
    pub fn resolve(&self, target: &str) -> Result<Url, SyncError> {
        let url = self
            .base
            .join(target)
            .map_err(|e| SyncError::InvalidArgument(format!("url '{}': {}", target, e)))?;
        if url.origin() != self.base.origin() {
            metrics::record_blocked();
            warn!(url = %url, backend = %self.base, "Blocked request outside backend proxy");
            return Err(SyncError::Blocked(url.to_string()));
        }
        Ok(url)
    }

    /// GET any backend path and return the decoded JSON body.
    pub async fn get_json(
        &self,
        endpoint: &'static str,
        target: &str,
        credential: Option<&Credential>,
    ) -> Result<Value, SyncError> {
        let url = self.resolve(target)?;
        self.dispatch(endpoint, url, credential).await
    }

    async fn dispatch(
        &self,
        endpoint: &'static str,
        url: Url,
        credential: Option<&Credential>,
    ) -> Result<Value, SyncError> {
        let result = self.dispatch_inner(endpoint, url, credential).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_request(endpoint, outcome);
        result
    }

    async fn dispatch_inner(
        &self,
        endpoint: &'static str,
        url: Url,
        credential: Option<&Credential>,
    ) -> Result<Value, SyncError> {
        let _permit = self.gate.acquire().await?;
        let _timer = LatencyTimer::new(endpoint);
        debug!(endpoint, path = url.path(), "Dispatching request");

        let request = HttpRequest {
            url,
            bearer: credential.map(|c| c.access_token.clone()),
        };
        let response = match tokio::time::timeout(self.deadline, self.transport.send(request)).await {
            Ok(sent) => sent?,
            Err(_) => {
                return Err(SyncError::NetworkUnavailable(format!(
                    "deadline of {}ms exceeded",
                    self.deadline.as_millis()
                )))
            }
        };
        self.interpret(endpoint, response)
    }

    fn interpret(&self, endpoint: &'static str, response: HttpResponse) -> Result<Value, SyncError> {
        match response.status {
            200..=299 => {
                if response.body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_str(&response.body).map_err(SyncError::from)
            }
            401 => Err(SyncError::Unauthorized),
            403 => Err(SyncError::Forbidden),
            429 => {
                let wait = retry_after(&response)
                    .unwrap_or(self.default_retry_after)
                    .min(self.max_retry_after);
                self.gate.pause_for(wait);
                metrics::record_rate_limited(endpoint, wait);
                warn!(endpoint, retry_after_ms = wait.as_millis() as u64, "Rate limited by backend");
                Err(SyncError::RateLimited(wait))
            }
            status => Err(SyncError::ServerError(status)),
        }
    }

    fn with_term(&self, url: &mut Url) {
        if let Some(term) = &self.term_id {
            url.query_pairs_mut().append_pair("termid", term);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Endpoints
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_sections(&self, credential: &Credential) -> Result<Vec<Section>, SyncError> {
        let url = self.resolve(SECTIONS_PATH)?;
        let payload = self.dispatch("sections", url, Some(credential)).await?;
        normalize::normalize_sections(&payload)
    }

    /// One section's roster. `today` feeds the display age.
    pub async fn get_members(
        &self,
        section: &Section,
        credential: &Credential,
        today: NaiveDate,
    ) -> Result<Vec<Member>, SyncError> {
        let mut url = self.resolve(MEMBERS_PATH)?;
        url.query_pairs_mut().append_pair("sectionid", &section.id);
        self.with_term(&mut url);
        if !section.section_type.is_empty() {
            url.query_pairs_mut().append_pair("section", &section.section_type);
        }
        let payload = self.dispatch("members", url, Some(credential)).await?;
        normalize::normalize_members(&payload, section, today)
    }

    pub async fn get_events(&self, section_id: &str, credential: &Credential) -> Result<Vec<Event>, SyncError> {
        let mut url = self.resolve(EVENTS_PATH)?;
        url.query_pairs_mut().append_pair("sectionid", section_id);
        self.with_term(&mut url);
        let payload = self.dispatch("events", url, Some(credential)).await?;
        normalize::normalize_events(&payload, section_id)
    }

    pub async fn get_attendance(
        &self,
        event: &EventRef,
        credential: &Credential,
    ) -> Result<Vec<AttendanceRecord>, SyncError> {
        let mut url = self.resolve(ATTENDANCE_PATH)?;
        url.query_pairs_mut()
            .append_pair("sectionid", &event.section_id)
            .append_pair("eventid", &event.event_id);
        self.with_term(&mut url);
        let payload = self.dispatch("attendance", url, Some(credential)).await?;
        normalize::normalize_attendance(&payload, event)
    }

    pub async fn get_current_user(&self, credential: &Credential) -> Result<CurrentUser, SyncError> {
        let url = self.resolve(USER_PATH)?;
        let payload = self.dispatch("user", url, Some(credential)).await?;
        normalize::normalize_current_user(&payload)
    }

    /// Trade the OAuth callback query string for an access token.
    pub async fn exchange_callback(&self, query: &str) -> Result<AuthGrant, SyncError> {
        let mut url = self.resolve(CALLBACK_PATH)?;
        let query = query.trim_start_matches('?');
        if !query.is_empty() {
            url.set_query(Some(query));
        }
        let payload = self.dispatch("auth_callback", url, None).await?;
        let grant: AuthGrant = serde_json::from_value(payload)?;
        Ok(grant)
    }
}

/// Parse a hint like `"2"` (seconds), `"1.5"` or `"250ms"`.
fn parse_hint(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let secs = raw.strip_suffix('s').unwrap_or(raw).trim().parse::<f64>().ok()?;
    // out-of-range values saturate, the adapter caps them afterwards
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Some(d),
        Err(_) if secs.is_finite() && secs > 0.0 => Some(Duration::MAX),
        Err(_) => None,
    }
}

/// Server hint carried by a 429, if any.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(parse_hint)
        .or_else(|| response.header("x-ratelimit-reset").and_then(parse_hint))
        .or_else(|| {
            let body: Value = serde_json::from_str(&response.body).ok()?;
            body.get("retry_after_ms")
                .and_then(Value::as_u64)
                .map(Duration::from_millis)
        })
}
