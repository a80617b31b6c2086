// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The compactor: replaces old history with a model-authored summary.
//!
//! Operates on a cut-point: everything strictly before it is summarised
//! and dropped from future history construction, everything at or after is
//! kept verbatim.  The cut-point never separates an assistant message from
//! its tool results, and the most recent user turns are always kept.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use otto_model::{
    ChatMessage, ContentBlock, ModelDescriptor, Provider, ReasoningLevel, StopReason, StreamEvent,
    UnifiedRequest,
};

use crate::error::CoreError;
use crate::events::{EventBus, SessionEvent};
use crate::log::{CompactionRecord, Entry, EntryKind, MessageRecord, SessionLog};
use crate::prompts::SUMMARIZE_PROMPT;

/// What a completed compaction produced.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub entry_id: String,
    pub tokens_before: u64,
}

/// Compact the session once.
///
/// Returns `Ok(None)` when there is nothing to summarise (fewer user turns
/// than the keep window, or a compaction already covers everything), which
/// makes back-to-back `compact` calls a no-op.  Cancellation leaves the log
/// untouched.
#[allow(clippy::too_many_arguments)]
pub async fn compact(
    log: &mut SessionLog,
    provider: &dyn Provider,
    credential: &str,
    model: &ModelDescriptor,
    events: &EventBus,
    cancel: &CancellationToken,
    keep_recent_turns: usize,
    instructions: Option<&str>,
) -> Result<Option<CompactionOutcome>, CoreError> {
    let (cut_id, summary_input, tokens_before, parent_entry_id) = {
        let (suffix, previous) = log.live_suffix();
        let Some(cut) = select_cut_point(suffix, keep_recent_turns) else {
            return Ok(None);
        };
        let to_summarise: Vec<&Entry> = suffix[..cut]
            .iter()
            .filter(|e| {
                !matches!(
                    e.kind(),
                    Some(EntryKind::Session(_)) | Some(EntryKind::Compaction(_)) | None
                )
            })
            .collect();
        if to_summarise.is_empty() {
            return Ok(None);
        }

        let transcript = serialize_entries(&to_summarise);
        let mut prompt = String::from(SUMMARIZE_PROMPT);
        if let Some(prev) = previous {
            prompt.push_str("\n\nSummary of even earlier history:\n");
            prompt.push_str(&prev.summary);
        }
        if let Some(extra) = instructions {
            prompt.push_str("\n\nAdditional instructions from the user:\n");
            prompt.push_str(extra);
        }
        prompt.push_str("\n\n---\n\n");
        prompt.push_str(&transcript);

        let tokens_before = (transcript.len() / 4) as u64;
        let parent = log.latest_compaction().map(|e| e.id.clone());
        (suffix[cut].id.clone(), prompt, tokens_before, parent)
    };

    debug!(cut = %cut_id, tokens_before, "compacting session history");
    let summary = summarise(provider, credential, model, &summary_input, cancel).await?;
    if cancel.is_cancelled() {
        return Err(CoreError::Aborted);
    }

    let entry = log.append(EntryKind::Compaction(CompactionRecord {
        summary,
        tokens_before,
        parent_entry_id,
        first_kept_entry_id: cut_id,
    }))?;
    let outcome = CompactionOutcome {
        entry_id: entry.id.clone(),
        tokens_before,
    };
    events
        .publish(SessionEvent::Compacted {
            entry_id: outcome.entry_id.clone(),
            tokens_before,
        })
        .await;
    Ok(Some(outcome))
}

/// Choose the index (into the live suffix) of the first kept entry.
///
/// The last `keep_recent_turns` user turns stay verbatim; the cut then
/// walks backward off tool-results so the kept suffix never begins with an
/// orphan result.
pub fn select_cut_point(suffix: &[Entry], keep_recent_turns: usize) -> Option<usize> {
    let user_positions: Vec<usize> = suffix
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_user_message())
        .map(|(i, _)| i)
        .collect();
    let keep = keep_recent_turns.max(1);
    if user_positions.len() <= keep {
        return None;
    }
    let mut cut = user_positions[user_positions.len() - keep];
    while cut > 0 && suffix[cut].is_tool_result() {
        cut -= 1;
    }
    // Nothing before the cut means nothing to summarise.
    if suffix[..cut].iter().all(|e| {
        matches!(
            e.kind(),
            Some(EntryKind::Session(_)) | Some(EntryKind::Compaction(_))
        )
    }) {
        return None;
    }
    Some(cut)
}

/// Single tool-free completion collecting the summary text.
async fn summarise(
    provider: &dyn Provider,
    credential: &str,
    model: &ModelDescriptor,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<String, CoreError> {
    let req = UnifiedRequest {
        model: model.clone(),
        system_prompt: None,
        messages: vec![ChatMessage::user(prompt)],
        tools: vec![],
        reasoning: ReasoningLevel::Off,
        max_output_tokens: Some(model.max_output_tokens),
    };
    let mut stream = provider.stream(req, credential, cancel.clone()).await?;
    let mut summary = String::new();
    while let Some(ev) = stream.next().await {
        match ev? {
            StreamEvent::TextDelta { delta, .. } => summary.push_str(&delta),
            StreamEvent::Done { stop_reason, error } => match stop_reason {
                StopReason::Aborted => return Err(CoreError::Aborted),
                StopReason::Error => {
                    return Err(CoreError::InvalidRequest(format!(
                        "compaction model call failed: {}",
                        error.unwrap_or_default()
                    )))
                }
                _ => break,
            },
            _ => {}
        }
    }
    if summary.trim().is_empty() {
        return Err(CoreError::InvalidRequest(
            "compaction produced an empty summary".into(),
        ));
    }
    Ok(summary)
}

/// Render entries as a plain transcript for the summarisation prompt.
fn serialize_entries(entries: &[&Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        match entry.kind() {
            Some(EntryKind::Message(MessageRecord::User { text, .. })) => {
                out.push_str("## User\n");
                out.push_str(text);
                out.push_str("\n\n");
            }
            Some(EntryKind::Message(MessageRecord::Assistant(a))) => {
                out.push_str("## Assistant\n");
                for block in &a.blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            out.push_str(text);
                            out.push('\n');
                        }
                        ContentBlock::Thinking { .. } => {}
                        ContentBlock::ToolCall(tc) => {
                            out.push_str(&format!("[tool call: {} {}]\n", tc.name, tc.arguments));
                        }
                    }
                }
                out.push('\n');
            }
            Some(EntryKind::ToolResult(r)) => {
                out.push_str(&format!(
                    "## Tool Result ({})\n",
                    r.tool_name.as_deref().unwrap_or("?")
                ));
                for b in &r.blocks {
                    if let otto_model::ResultBlock::Text { text } = b {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
                out.push('\n');
            }
            Some(EntryKind::BashExecution(b)) => {
                out.push_str(&format!("## Shell\n$ {}\n{}\n\n", b.command, b.output));
            }
            _ => {}
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
