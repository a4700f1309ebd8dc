// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::{AuthGrant, AuthState};
use crate::coordinator::SyncEngine;
use crate::error::SyncError;
use crate::model::CurrentUser;

/// Session controls for the view layer.
#[derive(Clone)]
pub struct AuthHandle {
    engine: Arc<SyncEngine>,
    user: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl AuthHandle {
    pub(super) fn new(engine: Arc<SyncEngine>, user: Arc<watch::Sender<Option<CurrentUser>>>) -> Self {
        Self { engine, user }
    }

    #[must_use]
    pub fn user(&self) -> Option<CurrentUser> {
        self.user.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.engine.tokens().state()
    }

    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        self.engine.tokens().remaining_ms()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.engine.tokens().subscribe()
    }

    #[must_use]
    pub fn subscribe_user(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.user.subscribe()
    }

    /// Store the grant, then fetch the signed-in user.
    ///
    /// The credential is kept even if the user fetch fails, unless the
    /// backend rejects it outright.
    pub async fn login(&self, grant: &AuthGrant) -> Result<CurrentUser, SyncError> {
        let tokens = self.engine.tokens();
        tokens.login(grant)?;
        let credential = tokens.get().ok_or(SyncError::TokenExpired)?;

        match self.engine.adapter().get_current_user(&credential).await {
            Ok(user) => {
                info!(user_id = %user.id, "Signed in");
                self.user.send_replace(Some(user.clone()));
                Ok(user)
            }
            Err(SyncError::Unauthorized) => {
                tokens.mark_expired();
                Err(SyncError::Unauthorized)
            }
            Err(e) => {
                warn!(error = %e, "Signed in but user lookup failed");
                Err(e)
            }
        }
    }

    /// Complete the OAuth redirect: exchange the callback query, then log in.
    pub async fn login_with_callback(&self, query: &str) -> Result<CurrentUser, SyncError> {
        let grant = self.engine.adapter().exchange_callback(query).await?;
        self.login(&grant).await
    }

    /// Drop the credential and abort pending retry waits. Cached data stays.
    pub fn logout(&self) {
        self.engine.tokens().clear();
        self.user.send_replace(None);
        info!("Signed out");
    }
}
