// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::{ProviderError, StreamEvent, UnifiedRequest};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// The dispatcher boundary: one request in, one lazy event sequence out.
///
/// Implementations never retry; a failed request is one failed sequence.
/// Cancelling `cancel` must stop consuming the upstream body and end the
/// sequence with `Done { stop_reason: Aborted }`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id used for status display and credential lookup.
    fn name(&self) -> &str;

    /// Open a streaming completion.
    ///
    /// `credential` is the opaque access string dispensed by the credential
    /// store (for composed credentials the store has already flattened the
    /// parts into one string).
    async fn stream(
        &self,
        req: UnifiedRequest,
        credential: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError>;
}
