// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Generic streaming driver for chat-completion endpoints.
//!
//! One request produces one normalised event sequence; retries belong to
//! the caller.  The driver owns the SSE plumbing, the block-cursor state
//! machine that turns flat deltas into start/delta/end triples, and the
//! finish-reason mapping.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    descriptor::ThinkingFormat,
    provider::{EventStream, Provider},
    shape::shape_request,
    sse::{drain_complete_lines, SseEvent},
    think::{ThinkSpan, ThinkSplitter},
    ProviderError, StopReason, StreamEvent, ToolCallBlock, UnifiedRequest,
};

/// Streaming driver over the generic chat-completions wire.
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        req: UnifiedRequest,
        credential: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        let body = shape_request(&req);
        debug!(
            model = %req.model.id,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending completion request"
        );

        let resp = self
            .client
            .post(&req.model.base_url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            let mut err = ProviderError::from_status(status.as_u16(), &text);
            if let ProviderError::RateLimited { retry_after: ra } = &mut err {
                *ra = retry_after;
            }
            return Err(err);
        }

        let (tx, rx) = mpsc::channel::<Result<StreamEvent, ProviderError>>(64);
        let model = req.model.clone();
        let byte_stream = resp.bytes_stream();
        tokio::spawn(async move {
            let mut norm = Normalizer::new(model.caps.thinking == ThinkingFormat::InlineTags);
            let _ = tx.send(Ok(StreamEvent::Start)).await;
            let mut byte_stream = Box::pin(byte_stream);
            let mut buf = String::new();
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Stop consuming the upstream body immediately.
                        let _ = tx
                            .send(Ok(StreamEvent::Done {
                                stop_reason: StopReason::Aborted,
                                error: None,
                            }))
                            .await;
                        return;
                    }
                    chunk = byte_stream.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        for ev in drain_complete_lines(&mut buf) {
                            let done = matches!(ev, SseEvent::Done);
                            for out in norm.feed(ev, Some(&model)) {
                                if tx.send(Ok(out)).await.is_err() {
                                    return;
                                }
                            }
                            if done {
                                for out in norm.finish(false) {
                                    let _ = tx.send(Ok(out)).await;
                                }
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("stream transport error: {e}");
                        for out in norm.finish(true) {
                            let _ = tx.send(Ok(out)).await;
                        }
                        return;
                    }
                    None => {
                        // Connection dropped without the [DONE] sentinel.
                        for out in norm.finish(true) {
                            let _ = tx.send(Ok(out)).await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ─── Delta normalisation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cursor {
    Idle,
    Text(usize),
    Thinking(usize),
}

#[derive(Debug, Default)]
struct PendingCall {
    block_index: usize,
    started: bool,
    id: String,
    name: String,
    args_buf: String,
    thought_signature: Option<String>,
}

impl PendingCall {
    /// Commit the canonical parse.  Model providers require the arguments to
    /// be an object; unparseable or empty buffers fall back to `{}` so the
    /// turn can still complete.
    fn finish(self) -> ToolCallBlock {
        let arguments = if self.args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        error = %e,
                        "tool call arguments failed to parse; substituting {{}}"
                    );
                    Value::Object(Default::default())
                }
            }
        };
        ToolCallBlock {
            id: self.id,
            name: self.name,
            arguments,
            thought_signature: self.thought_signature,
        }
    }
}

/// Turns flat wire deltas into the start/delta/end event grammar.
pub(crate) struct Normalizer {
    cursor: Cursor,
    next_index: usize,
    /// Pending tool calls keyed by the provider's parallel-call index, kept
    /// ordered so ToolCallEnd events flush in emission order.
    pending: BTreeMap<u32, PendingCall>,
    finish_reason: Option<String>,
    splitter: Option<ThinkSplitter>,
}

impl Normalizer {
    pub(crate) fn new(inline_tags: bool) -> Self {
        Self {
            cursor: Cursor::Idle,
            next_index: 0,
            pending: BTreeMap::new(),
            finish_reason: None,
            splitter: inline_tags.then(ThinkSplitter::new),
        }
    }

    pub(crate) fn feed(
        &mut self,
        ev: SseEvent,
        model: Option<&crate::ModelDescriptor>,
    ) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        match ev {
            SseEvent::TextDelta(delta) => {
                if let Some(splitter) = self.splitter.take() {
                    let mut splitter = splitter;
                    for span in splitter.push(&delta) {
                        match span {
                            ThinkSpan::Text(t) => self.text_delta(t, &mut out),
                            ThinkSpan::Thinking(t) => self.thinking_delta(t, None, &mut out),
                        }
                    }
                    self.splitter = Some(splitter);
                } else {
                    self.text_delta(delta, &mut out);
                }
            }
            SseEvent::ThinkingDelta(delta) => self.thinking_delta(delta, None, &mut out),
            SseEvent::ToolCallFragment {
                index,
                id,
                name,
                arguments,
                thought_signature,
            } => {
                self.close_cursor(&mut out);
                let next_index = &mut self.next_index;
                let call = self.pending.entry(index).or_insert_with(|| {
                    let block_index = *next_index;
                    *next_index += 1;
                    PendingCall {
                        block_index,
                        ..PendingCall::default()
                    }
                });
                if !call.started {
                    call.started = true;
                    out.push(StreamEvent::ToolCallStart {
                        index: call.block_index,
                    });
                }
                if !id.is_empty() {
                    call.id = id;
                }
                if !name.is_empty() {
                    call.name = name;
                }
                if thought_signature.is_some() {
                    call.thought_signature = thought_signature;
                }
                if !arguments.is_empty() {
                    call.args_buf.push_str(&arguments);
                    out.push(StreamEvent::ToolCallDelta {
                        index: call.block_index,
                        delta: arguments,
                    });
                }
            }
            SseEvent::Usage(u) => {
                let u = match model {
                    Some(m) => u.finalise(m),
                    None => u,
                };
                out.push(StreamEvent::Usage(u));
            }
            SseEvent::Finish(reason) => self.finish_reason = Some(reason),
            SseEvent::Done => {}
        }
        out
    }

    /// Close whatever is open and emit the terminal `Done`.
    ///
    /// `dropped` marks an upstream connection that ended without the `[DONE]`
    /// sentinel; that surfaces as `stop_reason = Error` so in-progress tool
    /// calls get synthetic error results downstream.
    pub(crate) fn finish(&mut self, dropped: bool) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if let Some(splitter) = self.splitter.take() {
            for span in splitter.finish() {
                match span {
                    ThinkSpan::Text(t) => self.text_delta(t, &mut out),
                    ThinkSpan::Thinking(t) => self.thinking_delta(t, None, &mut out),
                }
            }
        }
        self.close_cursor(&mut out);

        let mut had_tool_calls = false;
        let pending = std::mem::take(&mut self.pending);
        for (i, (_, call)) in pending.into_iter().enumerate() {
            if call.name.is_empty() {
                warn!("dropping tool call with empty name; cannot dispatch");
                continue;
            }
            let index = call.block_index;
            let mut block = call.finish();
            if block.id.is_empty() {
                block.id = format!("tc_synthetic_{i}");
            }
            had_tool_calls = true;
            out.push(StreamEvent::ToolCallEnd { index, block });
        }

        let (stop_reason, error) = if dropped {
            (
                StopReason::Error,
                Some("stream ended before completion".to_string()),
            )
        } else {
            match self.finish_reason.as_deref() {
                Some("length") => (StopReason::Length, None),
                Some("tool_calls") | Some("tool_use") => (StopReason::ToolUse, None),
                _ if had_tool_calls => (StopReason::ToolUse, None),
                _ => (StopReason::Stop, None),
            }
        };
        out.push(StreamEvent::Done { stop_reason, error });
        out
    }

    fn text_delta(&mut self, delta: String, out: &mut Vec<StreamEvent>) {
        if delta.is_empty() {
            return;
        }
        let index = match self.cursor {
            Cursor::Text(i) => i,
            _ => {
                self.close_cursor(out);
                let i = self.next_index;
                self.next_index += 1;
                self.cursor = Cursor::Text(i);
                out.push(StreamEvent::TextStart { index: i });
                i
            }
        };
        out.push(StreamEvent::TextDelta { index, delta });
    }

    fn thinking_delta(
        &mut self,
        delta: String,
        signature: Option<String>,
        out: &mut Vec<StreamEvent>,
    ) {
        if delta.is_empty() {
            return;
        }
        let index = match self.cursor {
            Cursor::Thinking(i) => i,
            _ => {
                self.close_cursor(out);
                let i = self.next_index;
                self.next_index += 1;
                self.cursor = Cursor::Thinking(i);
                out.push(StreamEvent::ThinkingStart {
                    index: i,
                    signature,
                });
                i
            }
        };
        out.push(StreamEvent::ThinkingDelta { index, delta });
    }

    fn close_cursor(&mut self, out: &mut Vec<StreamEvent>) {
        match self.cursor {
            Cursor::Idle => {}
            Cursor::Text(i) => out.push(StreamEvent::TextEnd { index: i }),
            Cursor::Thinking(i) => out.push(StreamEvent::ThinkingEnd { index: i }),
        }
        self.cursor = Cursor::Idle;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
