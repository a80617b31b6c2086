// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::glob::glob_matches;
use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 100;

/// Directories never worth searching.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

pub struct GrepTool {
    pub limit: usize,
}

impl Default for GrepTool {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search across files. pattern: full regex (escape literal\n\
         braces). include: glob filter such as *.rs or **/*.{ts,tsx}.\n\
         Matches are reported as file:line:text, leading matches first.\n\
         Binary files and .git/target/node_modules are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: current directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob filter, e.g. '*.rs'"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Case-sensitive search (default true)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum matches to return (default 100)"
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
        let include = call.args.get("include").and_then(Value::as_str);
        let case_sensitive = call
            .args
            .get("case_sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let limit = call
            .args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(self.limit as u64) as usize;

        let regex = {
            let mut builder = regex::RegexBuilder::new(pattern);
            builder.case_insensitive(!case_sensitive);
            match builder.build() {
                Ok(r) => r,
                Err(e) => {
                    return ToolOutput::err(&call.id, format!("invalid regex: {e}"));
                }
            }
        };

        let mut matches: Vec<String> = Vec::new();
        let mut hit_limit = false;
        'walk: for entry in WalkDir::new(&root)
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
            let display = entry.path().to_string_lossy().into_owned();
            if let Some(glob) = include {
                if !glob_matches(glob, &display) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                // Not valid UTF-8; treat as binary and skip.
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() >= limit {
                        hit_limit = true;
                        break 'walk;
                    }
                    matches.push(format!("{display}:{}:{line}", line_no + 1));
                }
            }
        }

        if matches.is_empty() {
            return ToolOutput::ok(&call.id, "no matches");
        }
        let mut out = matches.join("\n");
        if hit_limit {
            out.push_str(&format!("\n[truncated at {limit} matches]"));
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
            name: "grep".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nlet x = 1;\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "alpha beta\n").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/c.rs"), "fn alpha() {}\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_file_and_line() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &call(json!({"pattern": "alpha", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("a.rs:1:fn alpha() {}"));
        assert!(out.content.contains("b.txt:1:alpha beta"));
    }

    #[tokio::test]
    async fn skip_dirs_are_excluded() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &call(json!({"pattern": "alpha", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(!out.content.contains("target/"));
    }

    #[tokio::test]
    async fn include_glob_filters_files() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &call(json!({
                    "pattern": "alpha",
                    "path": dir.path().to_str().unwrap(),
                    "include": "*.rs"
                })),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("a.rs"));
        assert!(!out.content.contains("b.txt"));
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &call(json!({
                    "pattern": "ALPHA",
                    "path": dir.path().to_str().unwrap(),
                    "case_sensitive": false
                })),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.content.contains("a.rs"));
    }

    #[tokio::test]
    async fn no_matches_is_a_success_result() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &call(json!({"pattern": "zzz_nothing", "path": dir.path().to_str().unwrap()})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "no matches");
    }

    #[tokio::test]
    async fn invalid_regex_is_an_error_result() {
        let out = GrepTool::default()
            .execute(
                &call(json!({"pattern": "("})),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid regex"));
    }

    #[tokio::test]
    async fn limit_truncates_match_list() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (0..50).map(|i| format!("match {i}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), content).unwrap();
        let out = GrepTool::default()
            .execute(
                &call(json!({
                    "pattern": "match",
                    "path": dir.path().to_str().unwrap(),
                    "limit": 5
                })),
                &CancellationToken::new(),
                &sink(),
            )
            .await;
        assert_eq!(out.content.lines().filter(|l| l.contains("f.txt")).count(), 5);
        assert!(out.content.contains("truncated at 5"));
    }
}
