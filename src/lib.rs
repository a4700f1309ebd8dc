// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Scout Sync
//!
//! Offline-first data layer for a Scout group membership and
//! event-attendance console.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Page Data Facade                        │
//! │  • use_page_data(kind) → snapshot { data, loading, error }  │
//! │  • use_auth() → user, state, login, logout, remaining_ms    │
//! └─────────────────────────────────────────────────────────────┘
//!          │ reads                              │ refresh()
//!          ▼                                    ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │    Persistent Store      │◄──│         Sync Engine          │
//! │  • Memory / SQLite       │   │  • sections → members/events │
//! │  • SyncMeta per kind     │   │    → attendance              │
//! │  • legacy migration      │   │  • coalesced, retried        │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                               │
//!                         ┌─────────────────────┴──────────────┐
//!                         ▼                                    ▼
//!               ┌──────────────────┐             ┌──────────────────────┐
//!               │   Token Store    │             │    Remote Adapter    │
//!               │  • expiry, skew  │             │  • origin check      │
//!               │  • auth state    │             │  • global rate gate  │
//!               └──────────────────┘             └──────────────────────┘
//! ```
//!
//! Reads are always served from the store; the network only ever writes
//! into it, and only through the engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scout_sync::{DataFacade, PageKind, SyncConfig};
//! use scout_sync::clock::SystemClock;
//! use scout_sync::remote::ReqwestTransport;
//! use scout_sync::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scout_sync::SyncError> {
//!     let store = SqliteStore::open("sqlite://console.db").await?;
//!     let facade = DataFacade::open(
//!         SyncConfig::default(),
//!         Arc::new(store),
//!         Arc::new(ReqwestTransport::new()?),
//!         Arc::new(SystemClock),
//!     )
//!     .await?;
//!
//!     let auth = facade.use_auth();
//!     auth.login_with_callback("?code=abc").await?;
//!
//!     let page = facade.use_page_data(PageKind::Events);
//!     page.refresh().await;
//!     println!("{:?}", page.snapshot().data);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`facade`]: [`DataFacade`], page snapshots and the auth handle
//! - [`coordinator`]: the [`SyncEngine`] pipeline
//! - [`remote`]: transport seam, rate gate, [`RemoteAdapter`](remote::RemoteAdapter)
//! - [`storage`]: [`PersistentStore`](storage::PersistentStore) backends and migration
//! - [`auth`]: [`TokenStore`] and [`AuthState`]
//! - [`normalize`]: envelope decoding, member merge, display age
//! - [`medical`]: medical and consent field classification
//! - [`resilience`]: retry policies and cancellable waits

pub mod auth;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod facade;
pub mod medical;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod remote;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use auth::{AuthGrant, AuthState, Credential, TokenStore};
pub use config::{RateLimitConfig, RetryPolicy, SyncConfig};
pub use coordinator::{Stage, StageOutcome, SyncEngine, SyncEvent, SyncReport, SyncRequest, SyncStatus};
pub use error::{NoticeLevel, SyncError};
pub use facade::{AuthHandle, DataFacade, PageData, PageHandle, PageKind, PageSnapshot};
pub use medical::{classify, classify_at, MedicalStatus};
pub use metrics::LatencyTimer;
pub use resilience::retry::RetryConfig;
pub use storage::StorageError;
