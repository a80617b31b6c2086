// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Typed provider/transport failures.
///
/// The dispatcher never retries internally; callers decide what is worth
/// retrying by matching on the variant.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Connection failures and 5xx responses.  Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// 429 with an optional `retry-after` hint.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The request exceeds the model's context window.
    #[error("context overflow: request exceeds the model context window")]
    ContextOverflow,

    /// 401/403, or the credential store rejected a refresh.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success response from the provider.
    #[error("provider error {status}: {message}")]
    Api { status: u16, message: String },

    /// The cancellation handle was closed.
    #[error("aborted")]
    Aborted,
}

impl ProviderError {
    /// Classify a non-success HTTP response.
    ///
    /// Context overflows arrive as 400s with a recognisable error string;
    /// the known spellings across providers are checked here so the caller
    /// gets one distinguishable variant.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 {
            return Self::RateLimited { retry_after: None };
        }
        if status == 401 || status == 403 {
            return Self::Unauthorized(truncate(body));
        }
        if status >= 500 {
            return Self::Network(format!("server error {status}: {}", truncate(body)));
        }
        if status == 400 && is_context_overflow_body(body) {
            return Self::ContextOverflow;
        }
        Self::Api {
            status,
            message: truncate(body),
        }
    }

    /// True for failures the session loop may retry with back-off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}

/// Known error-body spellings for "the prompt is too long".
fn is_context_overflow_body(body: &str) -> bool {
    body.contains("context_length_exceeded")
        || body.contains("exceed_context_size_error")
        || body.contains("prompt is too long")
        || body.contains("input length and `max_tokens` exceed")
}

fn truncate(body: &str) -> String {
    const MAX: usize = 400;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_maps_to_rate_limited() {
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn status_401_maps_to_unauthorized() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key"),
            ProviderError::Unauthorized(_)
        ));
    }

    #[test]
    fn status_500_maps_to_network() {
        assert!(ProviderError::from_status(503, "oops").is_retryable());
    }

    #[test]
    fn context_overflow_is_detected_from_400_body() {
        let body = r#"{"error":{"type":"exceed_context_size_error","n_ctx":54272}}"#;
        assert!(matches!(
            ProviderError::from_status(400, body),
            ProviderError::ContextOverflow
        ));
    }

    #[test]
    fn plain_400_is_api_error_not_overflow() {
        assert!(matches!(
            ProviderError::from_status(400, "invalid tool schema"),
            ProviderError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn only_network_and_rate_limit_are_retryable() {
        assert!(ProviderError::Network("x".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ProviderError::ContextOverflow.is_retryable());
        assert!(!ProviderError::Unauthorized("x".into()).is_retryable());
        assert!(!ProviderError::Aborted.is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match ProviderError::from_status(418, &body) {
            ProviderError::Api { message, .. } => assert!(message.len() < 500),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
