// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::descriptor::ModelDescriptor;

// ─── Content blocks ───────────────────────────────────────────────────────────

/// A single tool invocation requested by the model.
///
/// `arguments` is the canonical parse of the streamed JSON fragments.
/// `thought_signature` is an opaque provider envelope attached to the call
/// by reasoning-capable providers; it must be returned verbatim on the next
/// request or the provider rejects the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// One typed element inside an assistant message, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Reasoning trace.  `signature` identifies the provider's proprietary
    /// envelope so the block can be replayed verbatim on follow-up.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall(ToolCallBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the tool call payload when this block is one.
    pub fn as_tool_call(&self) -> Option<&ToolCallBlock> {
        match self {
            Self::ToolCall(tc) => Some(tc),
            _ => None,
        }
    }
}

/// A content part of a user message: plain text or an attached image
/// (data URL `data:<mime>;base64,<b64>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UserBlock {
    Text { text: String },
    Image { image_url: String },
}

/// A content part of a tool result: text output or a captured image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResultBlock {
    Text { text: String },
    Image { image_url: String },
}

impl ResultBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

// ─── Stop reason and reasoning level ─────────────────────────────────────────

/// Normalised cause of a turn's end, across all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Aborted,
    Error,
}

impl StopReason {
    /// True when the turn ended without the provider finalising the message
    /// normally, so unresolved tool calls need synthetic error results.
    pub fn is_interrupted(self) -> bool {
        matches!(self, Self::Aborted | Self::Error)
    }
}

/// Per-turn hint about how much hidden reasoning the model should produce.
/// Providers without the concept ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Off,
    #[default]
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "xhigh" => Some(Self::Xhigh),
            _ => None,
        }
    }
}

// ─── Usage ───────────────────────────────────────────────────────────────────

/// Token usage for one completion, merged across the provider's field
/// spellings so totals are consistent everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
    /// USD, computed from the descriptor's per-million pricing.
    pub cost: f64,
}

impl Usage {
    /// Fill `total_tokens` and `cost` from the descriptor's pricing.
    pub fn finalise(mut self, model: &ModelDescriptor) -> Self {
        self.total_tokens = self.input_tokens + self.output_tokens + self.cache_read_tokens;
        self.cost = (self.input_tokens + self.cache_read_tokens) as f64 / 1_000_000.0
            * model.input_price
            + self.output_tokens as f64 / 1_000_000.0 * model.output_price;
        self
    }
}

// ─── Conversation messages (dispatcher input) ────────────────────────────────

/// One message of the unified request history.
///
/// This is the in-process contract between the turn engine and the
/// dispatcher, not a network format.  Role bridging and flattening into the
/// concrete wire shape happen in [`crate::shape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum ChatMessage {
    System {
        text: String,
    },
    User {
        blocks: Vec<UserBlock>,
    },
    Assistant {
        blocks: Vec<ContentBlock>,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        blocks: Vec<ResultBlock>,
        is_error: bool,
    },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            blocks: vec![UserBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            blocks: vec![ContentBlock::text(text)],
        }
    }
}

/// A tool definition handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// The unified request handed to a [`crate::Provider`].
#[derive(Debug, Clone)]
pub struct UnifiedRequest {
    pub model: ModelDescriptor,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub reasoning: ReasoningLevel,
    pub max_output_tokens: Option<u32>,
}

// ─── Stream events ───────────────────────────────────────────────────────────

/// The dispatcher-neutral event stream.
///
/// Block indices are per-message and increase monotonically; text and
/// thinking deltas always arrive between the matching start/end pair.
/// `Usage` may arrive at any point (typically last, before `Done`).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start,
    TextStart {
        index: usize,
    },
    TextDelta {
        index: usize,
        delta: String,
    },
    TextEnd {
        index: usize,
    },
    ThinkingStart {
        index: usize,
        signature: Option<String>,
    },
    ThinkingDelta {
        index: usize,
        delta: String,
    },
    ThinkingEnd {
        index: usize,
    },
    ToolCallStart {
        index: usize,
    },
    /// A fragment of the streamed JSON arguments.
    ToolCallDelta {
        index: usize,
        delta: String,
    },
    /// Commits the canonical parse of the call.
    ToolCallEnd {
        index: usize,
        block: ToolCallBlock,
    },
    Usage(Usage),
    Done {
        stop_reason: StopReason,
        error: Option<String>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
