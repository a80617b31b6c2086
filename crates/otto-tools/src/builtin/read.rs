// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

/// Default number of lines returned when the caller does not specify a
/// limit.  Kept small to avoid flooding model context on the first read.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.
const MAX_BYTES: usize = 20_000;

pub struct ReadTool {
    pub line_limit: usize,
    pub byte_limit: usize,
}

impl Default for ReadTool {
    fn default() -> Self {
        Self {
            line_limit: DEFAULT_LINE_LIMIT,
            byte_limit: MAX_BYTES,
        }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file. Default: 200 lines / 20 KB, whichever comes first.\n\
         Lines are returned as L{n}:content (1-indexed). When more lines\n\
         exist, a pagination notice shows the next offset.\n\
         Use grep to find the relevant region first, then read only those\n\
         lines with offset + limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> ToolOutput {
        let path = shellexpand::tilde(call.args["path"].as_str().unwrap_or_default()).into_owned();
        let offset = call.args.get("offset").and_then(Value::as_u64).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(self.line_limit as u64) as usize;
        let offset = offset.max(1);

        let raw = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read {path}: {e}")),
        };
        let lines: Vec<&str> = raw.lines().collect();
        let total = lines.len();
        if offset > total && total > 0 {
            return ToolOutput::err(
                &call.id,
                format!("offset {offset} is past the end of the file ({total} lines)"),
            );
        }

        let mut out = String::new();
        let mut shown = 0usize;
        let mut truncated_by_bytes = false;
        for (i, line) in lines.iter().enumerate().skip(offset - 1).take(limit) {
            let rendered = format!("L{}:{}\n", i + 1, line);
            if out.len() + rendered.len() > self.byte_limit {
                truncated_by_bytes = true;
                break;
            }
            out.push_str(&rendered);
            shown += 1;
        }

        let next = offset + shown;
        if next <= total {
            let reason = if truncated_by_bytes { "byte limit" } else { "line limit" };
            out.push_str(&format!(
                "[{} of {} lines shown ({reason}); continue with offset={}]\n",
                shown, total, next
            ));
        }
        if out.is_empty() {
            out = "[empty file]".into();
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
