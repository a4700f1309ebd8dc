// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local credential holder with an expiry clock.
//!
//! The session state is a total function of four inputs: whether a
//! credential is held, whether it is still inside its expiry (minus skew),
//! whether expiry has been detected, and whether the store holds cached
//! data. A sync-in-progress flag refines `authenticated` into `syncing`.
//!
//! ```text
//!                 valid credential ──► authenticated ◄──► syncing
//!                        │ expiry detected / 401
//!                        ▼
//!                  token_expired
//!                        │ clear()
//!                        ▼
//!     cache present ? cached_only : no_data
//! ```

use std::fmt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::SyncError;
use crate::resilience::retry::CancelSignal;

/// Derived session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    NoData,
    CachedOnly,
    Authenticated,
    TokenExpired,
    Syncing,
}

impl AuthState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::CachedOnly => "cached_only",
            Self::Authenticated => "authenticated",
            Self::TokenExpired => "token_expired",
            Self::Syncing => "syncing",
        }
    }

    /// A usable credential is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Syncing)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An access token and its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at_ms: i64,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// The `/api/auth/callback` response.
#[derive(Clone, Deserialize)]
pub struct AuthGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: f64,
}

impl fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGrant").field("expires_in", &self.expires_in).finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Session {
    credential: Option<Credential>,
    expired: bool,
    syncing: bool,
    cache_present: bool,
}

pub struct TokenStore {
    session: RwLock<Session>,
    clock: SharedClock,
    skew_ms: i64,
    state_tx: watch::Sender<AuthState>,
    logout_tx: watch::Sender<u64>,
}

impl TokenStore {
    #[must_use]
    pub fn new(clock: SharedClock, skew_ms: u64) -> Self {
        let (state_tx, _) = watch::channel(AuthState::NoData);
        let (logout_tx, _) = watch::channel(0u64);
        Self {
            session: RwLock::new(Session::default()),
            clock,
            skew_ms: skew_ms as i64,
            state_tx,
            logout_tx,
        }
    }

    fn derive(&self, session: &Session, now_ms: i64) -> AuthState {
        let valid = session
            .credential
            .as_ref()
            .is_some_and(|c| now_ms < c.expires_at_ms - self.skew_ms);
        if valid {
            if session.syncing {
                AuthState::Syncing
            } else {
                AuthState::Authenticated
            }
        } else if session.expired || session.credential.is_some() {
            AuthState::TokenExpired
        } else if session.cache_present {
            AuthState::CachedOnly
        } else {
            AuthState::NoData
        }
    }

    fn publish(&self, session: &Session) {
        let state = self.derive(session, self.clock.now_ms());
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "Auth state changed");
                *current = state;
                true
            }
        });
        crate::metrics::set_auth_state(state);
    }

    /// Replace the credential.
    ///
    /// Fails when `expires_at_ms` is not finite or is not in the future.
    pub fn set(&self, token: impl Into<String>, expires_at_ms: f64) -> Result<(), SyncError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SyncError::InvalidArgument("empty access token".into()));
        }
        if !expires_at_ms.is_finite() {
            return Err(SyncError::InvalidArgument("expiry is not finite".into()));
        }
        let expires_at_ms = expires_at_ms as i64;
        if expires_at_ms <= self.clock.now_ms() {
            return Err(SyncError::InvalidArgument("expiry is in the past".into()));
        }
        let mut session = self.session.write();
        session.credential = Some(Credential { access_token: token, expires_at_ms });
        session.expired = false;
        self.publish(&session);
        info!(expires_at_ms, "Credential stored");
        Ok(())
    }

    /// Store a callback grant (`expires_in` seconds from now).
    pub fn login(&self, grant: &AuthGrant) -> Result<(), SyncError> {
        if !grant.expires_in.is_finite() {
            return Err(SyncError::InvalidArgument("expires_in is not finite".into()));
        }
        let expires_at = self.clock.now_ms() as f64 + grant.expires_in * 1000.0;
        self.set(grant.access_token.clone(), expires_at)
    }

    /// The credential while it is inside `expiry - skew`.
    ///
    /// On detecting expiry the credential is dropped and the state moves to
    /// `token_expired`.
    pub fn get(&self) -> Option<Credential> {
        let now = self.clock.now_ms();
        {
            let session = self.session.read();
            match &session.credential {
                Some(c) if now < c.expires_at_ms - self.skew_ms => return Some(c.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        let mut session = self.session.write();
        // re-check under the write lock: a concurrent set() may have landed
        if let Some(c) = &session.credential {
            if now < c.expires_at_ms - self.skew_ms {
                return Some(c.clone());
            }
        }
        if session.credential.take().is_some() {
            info!("Credential expired");
            session.expired = true;
            self.publish(&session);
        }
        None
    }

    /// Drop the credential (explicit logout). Pending retry waits abort.
    pub fn clear(&self) {
        let mut session = self.session.write();
        session.credential = None;
        session.expired = false;
        session.syncing = false;
        self.publish(&session);
        drop(session);
        self.logout_tx.send_modify(|generation| *generation += 1);
        info!("Credential cleared");
    }

    /// Record that the backend rejected the credential.
    pub fn mark_expired(&self) {
        let mut session = self.session.write();
        session.credential = None;
        session.expired = true;
        session.syncing = false;
        self.publish(&session);
    }

    pub fn set_syncing(&self, syncing: bool) {
        let mut session = self.session.write();
        if session.syncing != syncing {
            session.syncing = syncing;
            self.publish(&session);
        }
    }

    pub fn set_cache_present(&self, present: bool) {
        let mut session = self.session.write();
        if session.cache_present != present {
            session.cache_present = present;
            self.publish(&session);
        }
    }

    /// Milliseconds until the credential stops being served. No side effects.
    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        let now = self.clock.now_ms();
        self.session
            .read()
            .credential
            .as_ref()
            .map(|c| (c.expires_at_ms - self.skew_ms - now).max(0) as u64)
            .unwrap_or(0)
    }

    /// Current state, evaluated against the clock now.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.derive(&self.session.read(), self.clock.now_ms())
    }

    /// `expiry > now` (with skew) for the held credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Change feed of published states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// Fires on every explicit logout.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.logout_tx.subscribe()
    }
}
