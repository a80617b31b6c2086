// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed and\n\
         overwriting any existing content. For partial changes prefer edit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn preview(&self, args: &Value) -> Option<String> {
        args.get("path").and_then(Value::as_str).map(str::to_string)
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> ToolOutput {
        let path = &shellexpand::tilde(call.args["path"].as_str().unwrap_or_default()).into_owned();
        let content = call.args["content"].as_str().unwrap_or_default();

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return ToolOutput::err(
                        &call.id,
                        format!("cannot create directory {}: {e}", parent.display()),
                    );
                }
            }
        }
        let existed = std::path::Path::new(path).exists();
        match std::fs::write(path, content) {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!(
                    "{} {path} ({} bytes)",
                    if existed { "overwrote" } else { "wrote" },
                    content.len()
                ),
            )
            .with_details(json!({ "bytes": content.len(), "created": !existed })),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write {path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
