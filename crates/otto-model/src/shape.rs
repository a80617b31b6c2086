// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Request shaping: the single place where provider quirks are applied.
//!
//! Takes a [`UnifiedRequest`] and produces the wire body, consulting the
//! capability flags on the model descriptor.  Nothing outside this module
//! branches on provider identity.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::{
    descriptor::ThinkingFormat, ChatMessage, ContentBlock, ReasoningLevel, ResultBlock,
    UnifiedRequest, UserBlock,
};

/// Text of the synthetic assistant message inserted between a tool-result
/// and a directly following user message for providers that reject that
/// adjacency.
const BRIDGE_TEXT: &str = "Continuing after tool results.";

/// Build the streaming request body for the generic chat-completions wire.
pub fn shape_request(req: &UnifiedRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 2);

    if let Some(system) = &req.system_prompt {
        let mut sys = json!({ "role": "system", "content": system });
        if req.model.caps.cache_markers {
            sys["cache_control"] = json!({ "type": "ephemeral" });
        }
        messages.push(sys);
    }

    let mut prev_was_tool_result = false;
    for msg in &req.messages {
        match msg {
            ChatMessage::System { text } => {
                messages.push(json!({ "role": "system", "content": text }));
                prev_was_tool_result = false;
            }
            ChatMessage::User { blocks } => {
                if prev_was_tool_result && req.model.caps.bridge_tool_role {
                    messages.push(json!({ "role": "assistant", "content": BRIDGE_TEXT }));
                }
                messages.push(shape_user(blocks));
                prev_was_tool_result = false;
            }
            ChatMessage::Assistant { blocks } => {
                shape_assistant(blocks, req, &mut messages);
                prev_was_tool_result = false;
            }
            ChatMessage::ToolResult {
                tool_call_id,
                blocks,
                is_error,
                ..
            } => {
                let id = wire_tool_id(tool_call_id, req);
                let text = result_text(blocks, *is_error);
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": text,
                }));
                prev_was_tool_result = true;
            }
        }
    }

    // A single cache marker near the tail of the history; the provider moves
    // the breakpoint forward as the conversation grows.
    if req.model.caps.cache_markers {
        if let Some(last) = messages.last_mut() {
            last["cache_control"] = json!({ "type": "ephemeral" });
        }
    }

    let mut body = json!({
        "model": req.model.id,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if let Some(max) = req.max_output_tokens {
        body["max_tokens"] = json!(max);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    apply_thinking_fields(&mut body, req);
    body
}

fn shape_user(blocks: &[UserBlock]) -> Value {
    // Single text part collapses to a plain string for cleaner wire traffic.
    if let [UserBlock::Text { text }] = blocks {
        return json!({ "role": "user", "content": text });
    }
    let parts: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            UserBlock::Text { text } => json!({ "type": "text", "text": text }),
            UserBlock::Image { image_url } => {
                json!({ "type": "image_url", "image_url": { "url": image_url } })
            }
        })
        .collect();
    json!({ "role": "user", "content": parts })
}

/// Flatten one assistant message.  All tool calls of the message are carried
/// in a single `tool_calls` array (parallel-call wire rule); thinking blocks
/// are replayed through the reasoning field with their signature intact.
fn shape_assistant(blocks: &[ContentBlock], req: &UnifiedRequest, out: &mut Vec<Value>) {
    let mut text = String::new();
    let mut thinking = String::new();
    let mut signature: Option<&str> = None;
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::Thinking { text: t, signature: s } => {
                thinking.push_str(t);
                if signature.is_none() {
                    signature = s.as_deref();
                }
            }
            ContentBlock::ToolCall(tc) => {
                let mut call = json!({
                    "id": wire_tool_id(&tc.id, req),
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                });
                if let Some(sig) = &tc.thought_signature {
                    call["thought_signature"] = json!(sig);
                }
                tool_calls.push(call);
            }
        }
    }

    let mut msg = json!({ "role": "assistant", "content": text });
    if !thinking.is_empty() && req.model.caps.thinking == ThinkingFormat::OpenAi {
        msg["reasoning_content"] = json!(thinking);
        if let Some(sig) = signature {
            msg["reasoning_signature"] = json!(sig);
        }
    }
    if !tool_calls.is_empty() {
        msg["tool_calls"] = json!(tool_calls);
    }
    out.push(msg);
}

fn result_text(blocks: &[ResultBlock], is_error: bool) -> String {
    let text = blocks
        .iter()
        .filter_map(|b| match b {
            ResultBlock::Text { text } => Some(text.as_str()),
            ResultBlock::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if is_error && !text.starts_with("Error") {
        format!("Error: {text}")
    } else {
        text
    }
}

fn apply_thinking_fields(body: &mut Value, req: &UnifiedRequest) {
    match req.model.caps.thinking {
        ThinkingFormat::None | ThinkingFormat::InlineTags => {}
        ThinkingFormat::OpenAi => {
            if req.reasoning != ReasoningLevel::Off {
                body["reasoning_effort"] = json!(req.reasoning.as_str());
            }
        }
        ThinkingFormat::Qwen => {
            body["enable_thinking"] = json!(req.reasoning != ReasoningLevel::Off);
        }
        ThinkingFormat::Zai => {
            let ty = if req.reasoning == ReasoningLevel::Off {
                "disabled"
            } else {
                "enabled"
            };
            body["thinking"] = json!({ "type": ty });
        }
    }
}

fn wire_tool_id(id: &str, req: &UnifiedRequest) -> String {
    if req.model.caps.normalize_tool_ids {
        normalize_tool_id(id)
    } else {
        id.to_string()
    }
}

/// Deterministically rewrite an arbitrary tool-call id into exactly nine
/// alphanumeric characters.  Same input, same output, so the call and its
/// result reference the same id on the wire.
pub fn normalize_tool_id(id: &str) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let digest = Sha256::digest(id.as_bytes());
    digest
        .iter()
        .take(9)
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
