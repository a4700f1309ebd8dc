// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The closed error taxonomy shared by every layer.
//!
//! Subsystems keep their own narrow error types ([`StorageError`],
//! [`TransportError`]) and convert into [`SyncError`] at the boundary.
//! None of these variants carry user-facing phrasing; the view adapter maps
//! them to text via [`SyncError::notice_level`] and its own catalogue.
//!
//! [`StorageError`]: crate::storage::StorageError
//! [`TransportError`]: crate::remote::TransportError

use std::time::Duration;
use thiserror::Error;

use crate::remote::TransportError;
use crate::storage::StorageError;

/// Every failure the data layer can surface.
///
/// `Clone` so that a coalesced sync can hand the same outcome to every
/// awaiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited, retry after {}ms", .0.as_millis())]
    RateLimited(Duration),
    #[error("server error (status {0})")]
    ServerError(u16),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("blocked request to {0}")]
    Blocked(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("token expired")]
    TokenExpired,
}

/// How the view layer should present an error, when it chooses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl SyncError {
    /// Errors the sync engine absorbs with bounded retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkUnavailable(_) | Self::RateLimited(_) => true,
            Self::ServerError(status) => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Errors that end the whole run and move the session to `token_expired`.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::TokenExpired)
    }

    /// Errors that indicate a defect rather than an environmental condition.
    #[must_use]
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::DecodeError(_) | Self::Blocked(_) | Self::InvalidArgument(_))
    }

    #[must_use]
    pub fn notice_level(&self) -> NoticeLevel {
        match self {
            Self::NetworkUnavailable(_) | Self::RateLimited(_) => NoticeLevel::Info,
            Self::Unauthorized | Self::TokenExpired | Self::Forbidden => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited(_) => "rate_limited",
            Self::ServerError(_) => "server_error",
            Self::DecodeError(_) => "decode_error",
            Self::Blocked(_) => "blocked",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::TokenExpired => "token_expired",
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::NetworkUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}
