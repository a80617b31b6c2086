// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio_util::sync::CancellationToken;

use crate::tool::{ProgressSink, Tool, ToolCall, ToolOutput};

/// Exact-substring replacement with a unique-occurrence requirement.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact substring in a file. old_text must appear exactly\n\
         once; include enough surrounding lines to make it unique. The result\n\
         details carry a unified diff of the change."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find (must be unique in the file)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"],
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
        let path = shellexpand::tilde(call.args["path"].as_str().unwrap_or_default()).into_owned();
        let old_text = call.args["old_text"].as_str().unwrap_or_default();
        let new_text = call.args["new_text"].as_str().unwrap_or_default();

        if old_text.is_empty() {
            return ToolOutput::err(&call.id, "old_text must not be empty");
        }
        if old_text == new_text {
            return ToolOutput::err(&call.id, "old_text and new_text are identical");
        }

        let original = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read {path}: {e}")),
        };

        let occurrences = original.matches(old_text).count();
        if occurrences == 0 {
            return ToolOutput::err(
                &call.id,
                format!("old_text not found in {path}; re-read the file and try again"),
            )
            .with_details(json!({ "reason": "not-found" }));
        }
        if occurrences > 1 {
            return ToolOutput::err(
                &call.id,
                format!(
                    "old_text appears {occurrences} times in {path}; \
                     add surrounding context to make it unique"
                ),
            )
            .with_details(json!({ "reason": "ambiguous", "occurrences": occurrences }));
        }

        let updated = original.replacen(old_text, new_text, 1);
        if let Err(e) = std::fs::write(&path, &updated) {
            return ToolOutput::err(&call.id, format!("cannot write {path}: {e}"));
        }

        let text_diff = TextDiff::from_lines(&original, &updated);
        let diff = text_diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string();
        ToolOutput::ok(&call.id, format!("edited {path}"))
            .with_details(json!({ "diff": diff }))
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
            name: "edit".into(),
            args,
        }
    }

    async fn edit(path: &std::path::Path, old: &str, new: &str) -> ToolOutput {
        EditTool
            .execute(
                &call(json!({
                    "path": path.to_str().unwrap(),
                    "old_text": old,
                    "new_text": new,
                })),
                &CancellationToken::new(),
                &sink(),
            )
            .await
    }

    #[tokio::test]
    async fn unique_occurrence_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.rs");
        std::fs::write(&path, "fn main() {\n    old();\n}\n").unwrap();
        let out = edit(&path, "old()", "new()").await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "fn main() {\n    new();\n}\n"
        );
    }

    #[tokio::test]
    async fn result_details_carry_a_unified_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let out = edit(&path, "two", "2").await;
        let diff = out.details.unwrap()["diff"].as_str().unwrap().to_string();
        assert!(diff.contains("-two"));
        assert!(diff.contains("+2"));
        assert!(diff.contains("@@"));
    }

    #[tokio::test]
    async fn absent_substring_fails_with_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "content").unwrap();
        let out = edit(&path, "missing", "x").await;
        assert!(out.is_error);
        assert_eq!(out.details.unwrap()["reason"], "not-found");
    }

    #[tokio::test]
    async fn duplicate_substring_fails_with_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "dup\ndup\n").unwrap();
        let out = edit(&path, "dup", "x").await;
        assert!(out.is_error);
        let details = out.details.unwrap();
        assert_eq!(details["reason"], "ambiguous");
        assert_eq!(details["occurrences"], 2);
        // File untouched on failure.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dup\ndup\n");
    }

    #[tokio::test]
    async fn identical_old_and_new_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "same").unwrap();
        let out = edit(&path, "same", "same").await;
        assert!(out.is_error);
    }
}
