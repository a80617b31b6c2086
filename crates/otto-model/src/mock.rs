// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::{
    provider::{EventStream, Provider},
    ProviderError, StopReason, StreamEvent, ToolCallBlock, UnifiedRequest, Usage,
};

/// A pre-scripted provider.  Each `stream` call pops the next script from
/// the front of the queue, so tests can specify exact event sequences,
/// including tool calls, without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<UnifiedRequest>>>,
    /// Every request seen, in order.
    pub requests: Arc<Mutex<Vec<UnifiedRequest>>>,
}

enum Script {
    Events(Vec<StreamEvent>),
    Error(fn() -> ProviderError),
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().map(Script::Events).collect())),
            last_request: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a request-level failure before the remaining scripts.
    pub fn with_leading_error(self, make: fn() -> ProviderError) -> Self {
        self.scripts.lock().unwrap().insert(0, Script::Error(make));
        self
    }

    /// Insert a request-level failure at `position` in the script queue.
    pub fn with_error_at(self, position: usize, make: fn() -> ProviderError) -> Self {
        let mut scripts = self.scripts.lock().unwrap();
        let position = position.min(scripts.len());
        scripts.insert(position, Script::Error(make));
        drop(scripts);
        self
    }

    /// Convenience: a single text reply with usage.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Event sequence for one plain text turn.
    pub fn text_script(reply: impl Into<String>) -> Vec<StreamEvent> {
        vec![
            StreamEvent::Start,
            StreamEvent::TextStart { index: 0 },
            StreamEvent::TextDelta {
                index: 0,
                delta: reply.into(),
            },
            StreamEvent::TextEnd { index: 0 },
            StreamEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
                ..Usage::default()
            }),
            StreamEvent::Done {
                stop_reason: StopReason::Stop,
                error: None,
            },
        ]
    }

    /// Event sequence for one turn that requests a single tool call.
    pub fn tool_script(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Vec<StreamEvent> {
        let args_text = arguments.to_string();
        vec![
            StreamEvent::Start,
            StreamEvent::ToolCallStart { index: 0 },
            StreamEvent::ToolCallDelta {
                index: 0,
                delta: args_text,
            },
            StreamEvent::ToolCallEnd {
                index: 0,
                block: ToolCallBlock {
                    id: id.into(),
                    name: name.into(),
                    arguments,
                    thought_signature: None,
                },
            },
            StreamEvent::Done {
                stop_reason: StopReason::ToolUse,
                error: None,
            },
        ]
    }

    /// Convenience: a tool call on the first request, text on the second.
    pub fn tool_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_script(id, name, arguments),
            Self::text_script(final_text),
        ])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        req: UnifiedRequest,
        _credential: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        self.requests.lock().unwrap().push(req);

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Script::Events(Self::text_script("[no more scripts]"))
            } else {
                scripts.remove(0)
            }
        };
        let events = match script {
            Script::Error(make) => return Err(make()),
            Script::Events(events) => events,
        };

        // Honour cancellation between events the way a real body read would.
        use futures::StreamExt;
        let wrapped: Vec<Result<StreamEvent, ProviderError>> = events.into_iter().map(Ok).collect();
        let stream = stream::iter(wrapped).map(move |ev| {
            if cancel.is_cancelled() {
                Ok(StreamEvent::Done {
                    stop_reason: StopReason::Aborted,
                    error: None,
                })
            } else {
                ev
            }
        });
        // Once an aborted Done is produced nothing further should follow.
        let stream = stream.scan(false, |done, ev| {
            if *done {
                return futures::future::ready(None);
            }
            if matches!(
                ev,
                Ok(StreamEvent::Done {
                    stop_reason: StopReason::Aborted,
                    ..
                })
            ) {
                *done = true;
            }
            futures::future::ready(Some(ev))
        });
        Ok(Box::pin(stream))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
