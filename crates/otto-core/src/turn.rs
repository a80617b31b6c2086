// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn engine: drives one assistant turn end to end.
//!
//! Consumes the dispatcher's normalised event stream while maintaining a
//! single current-block cursor, persists the finalised assistant message,
//! then executes requested tools in emission order.  Unresolved tool calls
//! always receive a result entry, synthetic on abort/error, so the log's
//! pairing invariant holds under every termination path.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use otto_model::{
    ContentBlock, Provider, ResultBlock, StopReason, StreamEvent, ToolCallBlock, UnifiedRequest,
    Usage,
};
use otto_tools::{ToolProgress, ToolRegistry};

use crate::error::CoreError;
use crate::events::{EventBus, MessageRole, SessionEvent};
use crate::log::{AssistantRecord, EntryKind, MessageRecord, SessionLog, ToolResultRecord};
use crate::partial_json::parse_partial_json;

/// Synthetic result body for tool calls interrupted by cancellation.
pub const ABORTED_RESULT_TEXT: &str = "Operation aborted";

/// Shared collaborators of one turn.
pub struct TurnContext<'a> {
    pub provider: &'a dyn Provider,
    pub tools: &'a ToolRegistry,
    pub events: &'a EventBus,
    pub cancel: &'a CancellationToken,
}

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub stop_reason: StopReason,
    pub usage: Option<Usage>,
    /// True when the assistant requested tools and the loop should ask the
    /// provider for another round.
    pub continue_loop: bool,
}

/// Run a single assistant turn against an already-built request.
pub async fn run_turn(
    ctx: &TurnContext<'_>,
    log: &mut SessionLog,
    req: UnifiedRequest,
    credential: &str,
) -> Result<TurnOutcome, CoreError> {
    let started = std::time::Instant::now();
    let model_id = req.model.id.clone();

    let mut stream = ctx
        .provider
        .stream(req, credential, ctx.cancel.clone())
        .await?;

    ctx.events
        .publish(SessionEvent::MessageStart {
            role: MessageRole::Assistant,
        })
        .await;

    // Block assembly: stream indices map to positions in `blocks`.
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut index_map: HashMap<usize, usize> = HashMap::new();
    let mut args_bufs: HashMap<usize, String> = HashMap::new();
    let mut usage: Option<Usage> = None;
    let mut terminal: Option<(StopReason, Option<String>)> = None;

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(e) => e,
            Err(e) => {
                warn!("provider stream error mid-turn: {e}");
                terminal = Some((StopReason::Error, Some(e.to_string())));
                break;
            }
        };
        match event {
            StreamEvent::Start => {}
            StreamEvent::TextStart { index } => {
                index_map.insert(index, blocks.len());
                blocks.push(ContentBlock::Text {
                    text: String::new(),
                });
                ctx.events.publish(SessionEvent::TextStart { index }).await;
            }
            StreamEvent::TextDelta { index, delta } => {
                if let Some(ContentBlock::Text { text }) = block_at(&mut blocks, &index_map, index)
                {
                    text.push_str(&delta);
                }
                ctx.events
                    .publish(SessionEvent::TextDelta { index, delta })
                    .await;
            }
            StreamEvent::TextEnd { index } => {
                ctx.events.publish(SessionEvent::TextEnd { index }).await;
            }
            StreamEvent::ThinkingStart { index, signature } => {
                index_map.insert(index, blocks.len());
                blocks.push(ContentBlock::Thinking {
                    text: String::new(),
                    signature: signature.clone(),
                });
                ctx.events
                    .publish(SessionEvent::ThinkingStart { index, signature })
                    .await;
            }
            StreamEvent::ThinkingDelta { index, delta } => {
                if let Some(ContentBlock::Thinking { text, .. }) =
                    block_at(&mut blocks, &index_map, index)
                {
                    text.push_str(&delta);
                }
                ctx.events
                    .publish(SessionEvent::ThinkingDelta { index, delta })
                    .await;
            }
            StreamEvent::ThinkingEnd { index } => {
                ctx.events
                    .publish(SessionEvent::ThinkingEnd { index })
                    .await;
            }
            StreamEvent::ToolCallStart { index } => {
                index_map.insert(index, blocks.len());
                blocks.push(ContentBlock::ToolCall(ToolCallBlock {
                    id: String::new(),
                    name: String::new(),
                    arguments: Value::Null,
                    thought_signature: None,
                }));
                args_bufs.insert(index, String::new());
                ctx.events
                    .publish(SessionEvent::ToolCallStart { index })
                    .await;
            }
            StreamEvent::ToolCallDelta { index, delta } => {
                let buf = args_bufs.entry(index).or_default();
                buf.push_str(&delta);
                // Best-effort incremental parse so observers see structure
                // before the call is complete.
                let partial = parse_partial_json(buf).unwrap_or(Value::Null);
                ctx.events
                    .publish(SessionEvent::ToolCallUpdate {
                        index,
                        partial_args: partial,
                    })
                    .await;
            }
            StreamEvent::ToolCallEnd { index, block } => {
                if let Some(slot) = block_at(&mut blocks, &index_map, index) {
                    *slot = ContentBlock::ToolCall(block.clone());
                } else {
                    // A provider that skips ToolCallStart still commits here.
                    index_map.insert(index, blocks.len());
                    blocks.push(ContentBlock::ToolCall(block.clone()));
                }
                ctx.events
                    .publish(SessionEvent::ToolCallEnd { index, block })
                    .await;
            }
            StreamEvent::Usage(u) => {
                usage = Some(u);
                ctx.events.publish(SessionEvent::Usage(u)).await;
            }
            StreamEvent::Done { stop_reason, error } => {
                terminal = Some((stop_reason, error));
                break;
            }
        }
    }

    // A stream that ends without `done` (connection drop the dispatcher
    // could not classify) surfaces as an error stop.
    let (stop_reason, error) = terminal.unwrap_or((
        StopReason::Error,
        Some("stream ended before completion".to_string()),
    ));

    let record = AssistantRecord {
        blocks: blocks.clone(),
        usage: usage.unwrap_or_default(),
        stop_reason,
        duration_ms: started.elapsed().as_millis() as u64,
        model: model_id,
    };
    log.append(EntryKind::Message(MessageRecord::Assistant(record.clone())))?;
    ctx.events
        .publish(SessionEvent::MessageEnd {
            role: MessageRole::Assistant,
            stop_reason: Some(stop_reason),
            message: MessageRecord::Assistant(record),
        })
        .await;
    if let Some(message) = &error {
        ctx.events
            .publish(SessionEvent::Error {
                message: message.clone(),
            })
            .await;
    }

    let tool_calls: Vec<ToolCallBlock> = blocks
        .iter()
        .filter_map(|b| b.as_tool_call().cloned())
        .collect();

    match stop_reason {
        StopReason::Stop | StopReason::Length => Ok(TurnOutcome {
            stop_reason,
            usage,
            continue_loop: false,
        }),
        StopReason::Aborted | StopReason::Error => {
            // Pairing invariant: every persisted tool call gets a result,
            // synthetic here because nothing was executed.
            let reason = if stop_reason == StopReason::Aborted {
                ABORTED_RESULT_TEXT.to_string()
            } else {
                error.unwrap_or_else(|| "provider stream error".to_string())
            };
            for call in &tool_calls {
                synthesize_error_result(ctx, log, call, &reason).await?;
            }
            Ok(TurnOutcome {
                stop_reason,
                usage,
                continue_loop: false,
            })
        }
        StopReason::ToolUse => {
            let mut interrupted = false;
            for call in &tool_calls {
                if interrupted || ctx.cancel.is_cancelled() {
                    interrupted = true;
                    synthesize_error_result(ctx, log, call, ABORTED_RESULT_TEXT).await?;
                    continue;
                }
                execute_one(ctx, log, call).await?;
                if ctx.cancel.is_cancelled() {
                    interrupted = true;
                }
            }
            Ok(TurnOutcome {
                stop_reason,
                usage,
                continue_loop: !interrupted && !ctx.cancel.is_cancelled(),
            })
        }
    }
}

fn block_at<'b>(
    blocks: &'b mut [ContentBlock],
    index_map: &HashMap<usize, usize>,
    index: usize,
) -> Option<&'b mut ContentBlock> {
    index_map.get(&index).and_then(|pos| blocks.get_mut(*pos))
}

/// Execute one tool call, forwarding partial progress to subscribers and
/// persisting only the final result.
async fn execute_one(
    ctx: &TurnContext<'_>,
    log: &mut SessionLog,
    call: &ToolCallBlock,
) -> Result<(), CoreError> {
    debug!(tool = %call.name, call_id = %call.id, "executing tool call");
    ctx.events
        .publish(SessionEvent::ToolExecutionStart { call: call.clone() })
        .await;

    let tool_call = otto_tools::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        args: call.arguments.clone(),
    };
    let (progress_tx, mut progress_rx) = mpsc::channel::<ToolProgress>(16);
    let exec = ctx.tools.execute(&tool_call, ctx.cancel, &progress_tx);
    tokio::pin!(exec);
    let output = loop {
        tokio::select! {
            out = &mut exec => break out,
            Some(p) = progress_rx.recv() => {
                ctx.events
                    .publish(SessionEvent::ToolExecutionUpdate {
                        call_id: p.call_id,
                        chunk: p.chunk,
                    })
                    .await;
            }
        }
    };
    while let Ok(p) = progress_rx.try_recv() {
        ctx.events
            .publish(SessionEvent::ToolExecutionUpdate {
                call_id: p.call_id,
                chunk: p.chunk,
            })
            .await;
    }

    let record = ToolResultRecord {
        tool_call_id: call.id.clone(),
        tool_name: Some(call.name.clone()),
        blocks: output
            .parts
            .iter()
            .map(|p| match p {
                otto_tools::ToolOutputPart::Text(t) => ResultBlock::Text { text: t.clone() },
                otto_tools::ToolOutputPart::Image(url) => ResultBlock::Image {
                    image_url: url.clone(),
                },
            })
            .collect(),
        is_error: output.is_error,
        details: output.details,
    };
    log.append(EntryKind::ToolResult(record.clone()))?;
    ctx.events
        .publish(SessionEvent::ToolExecutionEnd { result: record })
        .await;
    Ok(())
}

async fn synthesize_error_result(
    ctx: &TurnContext<'_>,
    log: &mut SessionLog,
    call: &ToolCallBlock,
    reason: &str,
) -> Result<(), CoreError> {
    let record = ToolResultRecord {
        tool_call_id: call.id.clone(),
        tool_name: Some(call.name.clone()),
        blocks: vec![ResultBlock::text(reason)],
        is_error: true,
        details: None,
    };
    log.append(EntryKind::ToolResult(record.clone()))?;
    ctx.events
        .publish(SessionEvent::ToolExecutionEnd { result: record })
        .await;
    Ok(())
}
