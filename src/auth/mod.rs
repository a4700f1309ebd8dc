// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session credential and derived auth state.

pub mod token_store;

pub use token_store::{AuthGrant, AuthState, Credential, TokenStore};
