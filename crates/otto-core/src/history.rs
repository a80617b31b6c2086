// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! History construction: turning the log's live suffix into the unified
//! request message list.

use otto_model::{ChatMessage, UserBlock};

use crate::log::{CompactionRecord, Entry, EntryKind, MessageRecord};

/// Convert the live suffix into dispatcher input messages.
///
/// The latest compaction's summary (when present) folds in as a leading
/// synthetic user message; extension entries are opaque to the core and
/// skipped.
pub fn build_messages(suffix: &[Entry], compaction: Option<&CompactionRecord>) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(suffix.len() + 1);

    if let Some(c) = compaction {
        messages.push(ChatMessage::user(format!(
            "Summary of the conversation so far (earlier history was compacted):\n\n{}",
            c.summary
        )));
    }

    for entry in suffix {
        let Some(kind) = entry.kind() else { continue };
        match kind {
            EntryKind::Session(_) | EntryKind::Compaction(_) => {}
            EntryKind::Message(MessageRecord::User { text, attachments }) => {
                let mut blocks = vec![UserBlock::Text { text: text.clone() }];
                blocks.extend(attachments.iter().map(|url| UserBlock::Image {
                    image_url: url.clone(),
                }));
                messages.push(ChatMessage::User { blocks });
            }
            EntryKind::Message(MessageRecord::Assistant(a)) => {
                if a.blocks.is_empty() {
                    // An aborted turn may have produced nothing; sending an
                    // empty assistant message upsets providers.
                    continue;
                }
                messages.push(ChatMessage::Assistant {
                    blocks: a.blocks.clone(),
                });
            }
            EntryKind::ToolResult(r) => {
                messages.push(ChatMessage::ToolResult {
                    tool_call_id: r.tool_call_id.clone(),
                    tool_name: r.tool_name.clone(),
                    blocks: r.blocks.clone(),
                    is_error: r.is_error,
                });
            }
            EntryKind::BashExecution(b) => {
                let exit = match (b.cancelled, b.exit_code) {
                    (true, _) => "aborted".to_string(),
                    (false, Some(c)) => format!("exit {c}"),
                    (false, None) => "exit ?".to_string(),
                };
                messages.push(ChatMessage::user(format!(
                    "I ran `{}` in the shell ({exit}):\n{}",
                    b.command, b.output
                )));
            }
        }
    }
    messages
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
