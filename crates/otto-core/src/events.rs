// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The subscriber event stream.
//!
//! Subscribers are bounded channels: a full channel applies back-pressure
//! to the emitter so UI and log can never diverge.  Credentials are never
//! part of any event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use otto_model::{StopReason, ToolCallBlock, Usage};

use crate::log::{BashRecord, MessageRecord, ToolResultRecord};

/// Buffered events per subscriber before back-pressure kicks in.
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Everything observable about a session, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    AgentStart,
    AgentEnd,
    MessageStart {
        role: MessageRole,
    },
    MessageEnd {
        role: MessageRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        message: MessageRecord,
    },
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
        #[serde(skip_serializing_if = "Option::is_none")]
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
    /// Streamed tool-call arguments, re-parsed best-effort so observers see
    /// a structured (possibly incomplete) value while it is still arriving.
    ToolCallUpdate {
        index: usize,
        partial_args: Value,
    },
    ToolCallEnd {
        index: usize,
        block: ToolCallBlock,
    },
    ToolExecutionStart {
        call: ToolCallBlock,
    },
    ToolExecutionUpdate {
        call_id: String,
        chunk: String,
    },
    ToolExecutionEnd {
        result: ToolResultRecord,
    },
    Usage(Usage),
    RetryStart {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    RetryEnd {
        attempt: u32,
    },
    Compacted {
        entry_id: String,
        tokens_before: u64,
    },
    BashExecution(BashRecord),
    SessionSwitched {
        session_id: String,
        path: String,
    },
    Error {
        message: String,
    },
}

pub type SubscriberId = u64;

/// Push-based fan-out to bounded subscriber channels.  Events are delivered
/// in production order; a slow subscriber blocks the emitter by design.
pub struct EventBus {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<SessionEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().expect("subscriber lock").insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().expect("subscriber lock").remove(&id);
    }

    /// Deliver one event to every subscriber.  Subscribers whose receiver
    /// was dropped are pruned.
    pub async fn publish(&self, event: SessionEvent) {
        let senders: Vec<(SubscriberId, mpsc::Sender<SessionEvent>)> = {
            let subs = self.subscribers.lock().expect("subscriber lock");
            subs.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };
        let mut dead: Vec<SubscriberId> = Vec::new();
        for (id, tx) in senders {
            if tx.send(event.clone()).await.is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscribers.lock().expect("subscriber lock");
            for id in dead {
                subs.remove(&id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
