// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use otto_auth::AuthError;
use otto_model::ProviderError;

/// Failures at the session-core level.
///
/// Errors inside a tool become data in the tool result and never surface
/// here; provider/transport failures end the turn with a structured stop
/// reason; only `Storage` and unrecoverable `Io` tear the session down.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A session log append failed.  Fatal to the turn; the session stays
    /// loadable from what was already written.
    #[error("session log append failed: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// User cancellation observed outside a streaming turn.
    #[error("aborted")]
    Aborted,

    #[error("{0}")]
    InvalidRequest(String),
}

impl CoreError {
    pub fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }
}
