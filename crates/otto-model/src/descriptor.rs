// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// How a model expects reasoning to be requested and returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingFormat {
    /// The model does not reason, or reasons invisibly.
    #[default]
    None,
    /// `reasoning_effort` request field, `reasoning_content` response deltas.
    OpenAi,
    /// `enable_thinking` boolean request flag.
    Qwen,
    /// `thinking: {type: enabled|disabled}` request object.
    Zai,
    /// The model writes `<think>…</think>` into the text stream; the
    /// dispatcher reclassifies those spans as thinking blocks.
    InlineTags,
}

/// Capability flags describing a provider's wire quirks.
///
/// All request shaping consults these flags in one place
/// ([`crate::shape::shape_request`]); nothing else branches per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelCaps {
    /// Insert a synthetic assistant message between a tool-result and a
    /// following user message.  Some providers reject tool→user adjacency.
    #[serde(default)]
    pub bridge_tool_role: bool,
    /// Rewrite tool-call ids to exactly 9 alphanumeric characters.
    #[serde(default)]
    pub normalize_tool_ids: bool,
    /// Attach prompt-cache markers (system prompt + tail of history).
    #[serde(default)]
    pub cache_markers: bool,
    #[serde(default)]
    pub thinking: ThinkingFormat,
}

/// Identity and limits of one concrete model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier forwarded on the wire, e.g. `gpt-5-codex`.
    pub id: String,
    /// Provider id; also the credential-store key, e.g. `openai`.
    pub provider: String,
    /// Chat completions endpoint URL.
    pub base_url: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// USD per million input tokens.
    #[serde(default)]
    pub input_price: f64,
    /// USD per million output tokens.
    #[serde(default)]
    pub output_price: f64,
    #[serde(default)]
    pub caps: ModelCaps,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            id: "unknown".into(),
            provider: "unknown".into(),
            base_url: String::new(),
            context_window: 128_000,
            max_output_tokens: 8_192,
            input_price: 0.0,
            output_price: 0.0,
            caps: ModelCaps::default(),
        }
    }
}

impl ModelDescriptor {
    /// Usable input budget: the context window minus the output reservation.
    pub fn input_budget(&self) -> u32 {
        self.context_window.saturating_sub(self.max_output_tokens)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
