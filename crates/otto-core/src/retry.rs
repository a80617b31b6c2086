// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use otto_config::RetryConfig;

/// Delay before retry number `attempt` (1-based).
///
/// A provider `retry-after` hint wins outright; otherwise the base delay
/// doubles per attempt up to the configured ceiling.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32, hint: Option<Duration>) -> Duration {
    if let Some(h) = hint {
        return h.min(Duration::from_millis(cfg.max_delay_ms));
    }
    let exp = attempt.saturating_sub(1).min(16);
    let ms = cfg
        .base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(cfg.max_delay_ms);
    Duration::from_millis(ms)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        assert_eq!(backoff_delay(&cfg(), 1, None), Duration::from_millis(500));
        assert_eq!(backoff_delay(&cfg(), 2, None), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&cfg(), 3, None), Duration::from_millis(2_000));
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(backoff_delay(&cfg(), 10, None), Duration::from_millis(4_000));
    }

    #[test]
    fn retry_after_hint_wins() {
        assert_eq!(
            backoff_delay(&cfg(), 1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn oversized_hint_is_clamped_to_ceiling() {
        assert_eq!(
            backoff_delay(&cfg(), 1, Some(Duration::from_secs(120))),
            Duration::from_millis(4_000)
        );
    }
}
