// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The only API pages use.
//!
//! Pages never touch the adapter. They read the store through
//! [`PageHandle`] snapshots and ask for forced syncs through
//! [`PageHandle::refresh`]; the session lives behind [`AuthHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scout_sync::{DataFacade, PageKind, SyncConfig};
//! use scout_sync::clock::SystemClock;
//! use scout_sync::remote::ReqwestTransport;
//! use scout_sync::storage::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), scout_sync::SyncError> {
//! let facade = DataFacade::open(
//!     SyncConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(SystemClock),
//! )
//! .await?;
//!
//! let page = facade.use_page_data(PageKind::Events);
//! let snapshot = page.ready().await;
//! if let Some(err) = &snapshot.error {
//!     println!("showing cached data ({:?})", err.notice_level());
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod page;

pub use auth::AuthHandle;
pub use page::{
    load_page, EventDetailPage, EventsPage, MoversPage, PageData, PageHandle, PageKind, PageSnapshot,
    SectionsPage,
};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::auth::TokenStore;
use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::coordinator::SyncEngine;
use crate::error::SyncError;
use crate::model::CurrentUser;
use crate::remote::{RemoteAdapter, Transport};
use crate::storage::PersistentStore;

pub struct DataFacade {
    engine: Arc<SyncEngine>,
    user: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl DataFacade {
    /// Wrap an engine. Records whether the store already holds data so the
    /// session can start in `cached_only`.
    pub async fn new(engine: Arc<SyncEngine>) -> Self {
        match engine.store().is_empty().await {
            Ok(empty) => engine.tokens().set_cache_present(!empty),
            Err(e) => warn!(error = %e, "Could not inspect store"),
        }
        let (user, _) = watch::channel(None);
        Self { engine, user: Arc::new(user) }
    }

    /// Build the whole stack from its parts.
    pub async fn open(
        config: SyncConfig,
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let tokens = Arc::new(TokenStore::new(clock.clone(), config.token_skew_ms));
        let adapter = Arc::new(RemoteAdapter::new(&config, transport)?);
        let engine = SyncEngine::new(config, tokens, store, adapter, clock);
        Ok(Self::new(engine).await)
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// A live snapshot of `kind`, served from the store first.
    #[must_use]
    pub fn use_page_data(&self, kind: PageKind) -> PageHandle {
        PageHandle::spawn(Arc::clone(&self.engine), kind)
    }

    #[must_use]
    pub fn use_auth(&self) -> AuthHandle {
        AuthHandle::new(Arc::clone(&self.engine), Arc::clone(&self.user))
    }
}
