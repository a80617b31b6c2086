// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent session core: an event-sourced, concurrent orchestrator that
//! drives a conversation between an operator, an LLM provider, and locally
//! executed tools.
//!
//! The append-only session log is the sole source of truth; everything the
//! runtime shows or sends is reconstructed from it.

pub mod compact;
pub mod error;
pub mod events;
pub mod export;
pub mod history;
pub mod ids;
pub mod log;
pub mod partial_json;
pub mod prompts;
pub mod retry;
pub mod session;
pub mod turn;

#[cfg(test)]
mod tests;

pub use error::CoreError;
pub use events::{EventBus, MessageRole, SessionEvent, SubscriberId};
pub use log::{
    AssistantRecord, BashRecord, CompactionRecord, Entry, EntryBody, EntryKind, MessageRecord,
    SessionHeader, SessionLog, ToolResultRecord,
};
pub use session::{AgentSession, RunState, SessionOptions};
