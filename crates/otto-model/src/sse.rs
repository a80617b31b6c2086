// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-sent-event plumbing for the streaming chat wire.
//!
//! SSE events can be split across TCP packets, so a line buffer is kept
//! across chunks and events are emitted only for complete lines.

use serde_json::Value;

use crate::Usage;

/// One parsed wire-level event, before normalisation into [`crate::StreamEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A fragment of one (possibly parallel) tool call, routed by the
    /// provider's `index` field.
    ToolCallFragment {
        index: u32,
        id: String,
        name: String,
        arguments: String,
        thought_signature: Option<String>,
    },
    Usage(Usage),
    /// The provider's raw finish reason, e.g. `stop`, `length`, `tool_calls`.
    Finish(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub fn drain_complete_lines(buf: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line.
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_data_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_chunk(&v)
}

fn parse_chunk(v: &Value) -> Option<SseEvent> {
    // Usage-only chunk (stream_options.include_usage).  Cached input tokens
    // arrive as prompt_tokens_details.cached_tokens (OpenAI spelling) or
    // prompt_cache_hit_tokens (DeepSeek spelling); cache writes as
    // cache_creation_input_tokens.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let cache_read = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .or_else(|| usage.get("prompt_cache_hit_tokens").and_then(Value::as_u64))
            .unwrap_or(0);
        let cache_write = usage
            .get("cache_creation_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let input = usage
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_sub(cache_read);
        return Some(SseEvent::Usage(Usage {
            input_tokens: input,
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cache_read_tokens: cache_read,
            cache_write_tokens: cache_write,
            ..Usage::default()
        }));
    }

    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(SseEvent::Finish(reason.to_string()));
    }

    let delta = &choice["delta"];

    // Tool call delta.  Each chunk carries one tool-call fragment in
    // practice; the index routes accumulation across parallel calls.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return Some(SseEvent::ToolCallFragment {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            thought_signature: tc
                .get("thought_signature")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    // Thinking delta: `reasoning_content` (llama.cpp, Qwen3, DeepSeek-R1)
    // or `reasoning` (OpenRouter and other aggregators).
    let thinking = delta
        .get("reasoning_content")
        .and_then(Value::as_str)
        .or_else(|| delta.get("reasoning").and_then(Value::as_str));
    if let Some(t) = thinking.filter(|t| !t.is_empty()) {
        return Some(SseEvent::ThinkingDelta(t.to_string()));
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(SseEvent::TextDelta(text.to_string()));
        }
    }

    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
