// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::glob::glob_matches;
use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 200;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

/// Locate files by glob pattern.
pub struct FindTool {
    pub limit: usize,
}

impl Default for FindTool {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, e.g. '*.rs' or 'src/**/*.ts'.\n\
         Patterns without a slash match the file name; patterns with a slash\n\
         match the path relative to the search root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: current directory)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of paths to return (default 200)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> ToolOutput {
        let pattern = call.args["pattern"].as_str().unwrap_or_default();
        let root = call
            .args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let limit = call
            .args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(self.limit as u64) as usize;

        let mut found: Vec<String> = Vec::new();
        let mut hit_limit = false;
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !e.file_name()
                    .to_str()
                    .is_some_and(|n| SKIP_DIRS.contains(&n))
            })
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if glob_matches(pattern, &rel) {
                if found.len() >= limit {
                    hit_limit = true;
                    break;
                }
                found.push(rel);
            }
        }

        if found.is_empty() {
            return ToolOutput::ok(&call.id, "no files matched");
        }
        let mut out = found.join("\n");
        if hit_limit {
            out.push_str(&format!("\n[truncated at {limit} files]"));
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> ProgressSink {
        tokio::sync::mpsc::channel(8).0
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "find".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/deep/mod.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn name_glob_matches_anywhere() {
        let dir = fixture();
        let out = FindTool::default()
            .execute(
                &call(json!({"pattern": "*.rs", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("src/main.rs"));
        assert!(out.content.contains("src/deep/mod.rs"));
        assert!(!out.content.contains("README.md"));
    }

    #[tokio::test]
    async fn path_glob_anchors_to_root() {
        let dir = fixture();
        let out = FindTool::default()
            .execute(
                &call(json!({"pattern": "src/*.rs", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("src/main.rs"));
        assert!(!out.content.contains("deep"));
    }

    #[tokio::test]
    async fn no_match_reports_cleanly() {
        let dir = fixture();
        let out = FindTool::default()
            .execute(
                &call(json!({"pattern": "*.zig", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "no files matched");
    }
}
