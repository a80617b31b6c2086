// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Unified LLM streaming contract and the provider dispatcher.
//!
//! Every concrete provider is driven through one [`Provider`] trait that
//! accepts a [`UnifiedRequest`] and returns a lazy stream of normalised
//! [`StreamEvent`]s.  Provider quirks (role bridging, tool-id shapes,
//! thinking formats, cache markers) live as capability flags on the
//! [`ModelDescriptor`] and are consulted in exactly one place, the request
//! shaper in [`shape`].

pub mod descriptor;
pub mod error;
pub mod mock;
pub mod provider;
pub mod shape;
pub mod sse;
pub mod think;
pub mod types;

mod http;

pub use descriptor::{ModelCaps, ModelDescriptor, ThinkingFormat};
pub use error::ProviderError;
pub use http::HttpProvider;
pub use mock::ScriptedProvider;
pub use provider::{EventStream, Provider};
pub use types::{
    ChatMessage, ContentBlock, ReasoningLevel, ResultBlock, StopReason, StreamEvent,
    ToolCallBlock, ToolSchema, UnifiedRequest, Usage, UserBlock,
};
