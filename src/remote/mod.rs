// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend proxy access.
//!
//! - [`Transport`]: one GET, no semantics ([`ReqwestTransport`], [`ScriptedTransport`])
//! - [`RateGate`]: global concurrency, spacing and 429 pause
//! - [`RemoteAdapter`]: origin check, status mapping, typed endpoints

pub mod adapter;
pub mod gate;
pub mod scripted;
pub mod transport;

pub use adapter::RemoteAdapter;
pub use gate::{GatePermit, RateGate};
pub use scripted::ScriptedTransport;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
