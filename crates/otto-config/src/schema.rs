// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` falls back to `false`, so fields that
/// default on need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub bash: BashConfig,
    /// Named model configurations, selectable with `--model <key>`.
    ///
    /// ```yaml
    /// providers:
    ///   local_qwen:
    ///     provider: openai
    ///     name: qwen3-coder
    ///     base_url: http://localhost:8080/v1/chat/completions
    ///     thinking: qwen
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider id; also the credential-store key.
    pub provider: String,
    /// Model name forwarded on the wire.
    pub name: String,
    /// Chat completions endpoint URL.
    pub base_url: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// USD per million input tokens; used for cost reporting only.
    #[serde(default)]
    pub input_price: f64,
    #[serde(default)]
    pub output_price: f64,
    /// Insert a synthetic assistant message between a tool result and a
    /// following user message (providers that reject that adjacency).
    #[serde(default)]
    pub bridge_tool_role: bool,
    /// Rewrite tool-call ids to 9 alphanumerics on the wire.
    #[serde(default)]
    pub normalize_tool_ids: bool,
    /// Attach prompt-cache markers to the system prompt and history tail.
    #[serde(default)]
    pub cache_markers: bool,
    /// Thinking format: none | openai | qwen | zai | inlinetags.
    #[serde(default)]
    pub thinking: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            base_url: None,
            context_window: default_context_window(),
            max_output_tokens: default_max_output_tokens(),
            input_price: 0.0,
            output_price: 0.0,
            bridge_tool_role: false,
            normalize_tool_ids: false,
            cache_markers: true,
            thinking: None,
        }
    }
}

fn default_context_window() -> u32 {
    200_000
}

fn default_max_output_tokens() -> u32 {
    8_192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reasoning level hint: off | minimal | low | medium | high | xhigh.
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
    /// Hard ceiling on assistant turns within one agent loop run.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Fraction of the context window at which automatic compaction fires,
    /// measured against the last observed input+output token usage.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of most recent user turns kept verbatim by compaction.
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    /// Run compaction automatically when the threshold is crossed.
    #[serde(default = "default_true")]
    pub auto_compact: bool,
    /// Sessions directory override; defaults to `~/.otto/sessions`.
    #[serde(default)]
    pub sessions_dir: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// System prompt override; None uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reasoning: default_reasoning(),
            max_turns: default_max_turns(),
            compaction_threshold: default_compaction_threshold(),
            keep_recent_turns: default_keep_recent_turns(),
            auto_compact: true,
            sessions_dir: None,
            retry: RetryConfig::default(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// Sessions directory with `~` and `$VAR` references expanded.
    pub fn sessions_dir_expanded(&self) -> Option<std::path::PathBuf> {
        self.sessions_dir
            .as_deref()
            .map(|d| shellexpand::tilde(d).into_owned().into())
    }
}

fn default_reasoning() -> String {
    "medium".into()
}

fn default_max_turns() -> u32 {
    40
}

fn default_compaction_threshold() -> f32 {
    0.85
}

fn default_keep_recent_turns() -> usize {
    3
}

/// Back-off policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First delay; doubles per attempt unless the provider sent a
    /// retry-after hint.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashConfig {
    /// Inline output cap in bytes; larger output is tail-truncated.
    #[serde(default = "default_inline_limit")]
    pub inline_limit_bytes: usize,
    /// Raw output beyond this many bytes is spooled to a temp file.
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold_bytes: usize,
}

impl Default for BashConfig {
    fn default() -> Self {
        Self {
            inline_limit_bytes: default_inline_limit(),
            spool_threshold_bytes: default_spool_threshold(),
        }
    }
}

fn default_inline_limit() -> usize {
    20_000
}

fn default_spool_threshold() -> usize {
    65_536
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = Config::default();
        assert!(c.agent.auto_compact);
        assert!(c.agent.compaction_threshold > 0.5);
        assert_eq!(c.agent.keep_recent_turns, 3);
        assert!(c.model.context_window > 0);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let c: Config = serde_yaml::from_str("agent:\n  max_turns: 7\n").unwrap();
        assert_eq!(c.agent.max_turns, 7);
        assert!(c.agent.auto_compact, "default_true helper applied");
        assert_eq!(c.agent.retry.max_retries, 3);
    }

    #[test]
    fn provider_entries_parse() {
        let yaml = "\
providers:
  local:
    provider: openai
    name: qwen3
    base_url: http://localhost:8080/v1/chat/completions
    thinking: qwen
";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let local = &c.providers["local"];
        assert_eq!(local.thinking.as_deref(), Some("qwen"));
        assert_eq!(local.context_window, 200_000);
    }
}
