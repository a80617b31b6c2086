// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 500;

/// List one directory level, directories first.
pub struct LsTool {
    pub limit: usize,
}

impl Default for LsTool {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory. Directories are listed first with a trailing\n\
         slash; file sizes are shown in bytes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: current directory)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> ToolOutput {
        let path = call
            .args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();

        let entries = match std::fs::read_dir(&path) {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot list {path}: {e}")),
        };

        let mut dirs: Vec<String> = Vec::new();
        let mut files: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(format!("{name}/")),
                _ => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    files.push(format!("{name} ({size} bytes)"));
                }
            }
        }
        dirs.sort();
        files.sort();

        let mut lines: Vec<String> = dirs;
        lines.extend(files);
        let total = lines.len();
        if total == 0 {
            return ToolOutput::ok(&call.id, "[empty directory]");
        }
        let shown: Vec<String> = lines.into_iter().take(self.limit).collect();
        let mut out = shown.join("\n");
        if total > self.limit {
            out.push_str(&format!("\n[{} more entries omitted]", total - self.limit));
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
