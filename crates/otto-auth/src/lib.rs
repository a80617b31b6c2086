// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Credential storage and refresh for every provider otto talks to.
//!
//! One [`CredentialStore`] per process, threaded explicitly into the agent
//! session (no globals, so several sessions can share one store).  Static
//! API keys come from the environment; OAuth credentials live in an
//! owner-only JSON file and refresh themselves inside a 5-minute safety
//! window with at-most-one refresh in flight per provider.

pub mod credential;
pub mod flows;
pub mod store;

pub use credential::{Credential, CredentialKind};
pub use flows::{DeviceCodeResponse, HttpRefresher, RefreshedToken, TokenRefresher};
pub use store::CredentialStore;

/// Typed credential failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The refresh was rejected; the user must re-authenticate.
    #[error("unauthorized for provider '{provider}': {message}")]
    Unauthorized { provider: String, message: String },

    /// Transient transport failure; retryable.
    #[error("network error during credential refresh: {0}")]
    Network(String),

    /// A required field (api key, project id, refresh token) is missing.
    #[error("credential misconfigured for provider '{provider}': {message}")]
    Misconfigured { provider: String, message: String },

    #[error("credential file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
