// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// A single content item in a rich tool output.  Most tools produce only
/// `Text`; screenshot-style tools may mix in `Image` data URLs.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputPart {
    Text(String),
    Image(String),
}

/// The result of executing a tool.
///
/// `content` is always the plain-text concatenation of the `Text` parts.
/// `details` carries tool-specific structured payload (exit codes, diffs,
/// spool paths) that consumers may surface without parsing `content`.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
    pub details: Option<Value>,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: false,
            details: None,
        }
    }

    /// Error result containing a plain-text message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: true,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A streamed partial-output chunk from a running tool.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub call_id: String,
    pub chunk: String,
}

/// Sink for partial output; the executor forwards chunks to subscribers
/// without writing intermediate state to the session log.
pub type ProgressSink = mpsc::Sender<ToolProgress>;

/// Trait every built-in and extension tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    /// Whether cancellation should terminate this tool's work in flight.
    /// Tools that only do quick local I/O may ignore the token.
    fn interruptible(&self) -> bool {
        false
    }
    /// Short human-readable preview of a call, for status lines.
    fn preview(&self, _args: &Value) -> Option<String> {
        None
    }
    /// Execute the call.  Failures are wrapped in [`ToolOutput::err`],
    /// never propagated as panics or `Err`.
    async fn execute(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_output_mirrors_content_into_parts() {
        let out = ToolOutput::ok("c1", "hello");
        assert!(!out.is_error);
        assert_eq!(out.parts, vec![ToolOutputPart::Text("hello".into())]);
        assert_eq!(out.content, "hello");
    }

    #[test]
    fn err_output_sets_flag() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }

    #[test]
    fn details_attach_structured_payload() {
        let out = ToolOutput::ok("c1", "done").with_details(json!({"exitCode": 0}));
        assert_eq!(out.details.unwrap()["exitCode"], 0);
    }
}
