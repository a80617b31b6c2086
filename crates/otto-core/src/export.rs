// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Standalone HTML export of a session transcript.

use std::io::Write;
use std::path::Path;

use otto_model::{ContentBlock, ResultBlock};

use crate::log::{Entry, EntryKind, MessageRecord};

/// Render the transcript to a self-contained HTML file.
pub fn export_html(entries: &[Entry], out_path: &Path) -> std::io::Result<()> {
    let mut html = String::from(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>otto session</title>\n<style>\n\
         body { font-family: monospace; max-width: 60rem; margin: 2rem auto; }\n\
         .user { color: #0a4; }\n\
         .assistant { color: #04a; }\n\
         .tool { color: #777; }\n\
         .error { color: #a00; }\n\
         pre { white-space: pre-wrap; border-left: 3px solid #ddd; padding-left: 0.6rem; }\n\
         </style>\n</head>\n<body>\n",
    );

    for entry in entries {
        match entry.kind() {
            Some(EntryKind::Session(h)) => {
                html.push_str(&format!(
                    "<h1>Session {}</h1>\n<p class=\"tool\">{} — {}</p>\n",
                    escape(&h.session_id),
                    h.created_at.to_rfc3339(),
                    escape(&h.cwd)
                ));
            }
            Some(EntryKind::Message(MessageRecord::User { text, .. })) => {
                html.push_str(&format!(
                    "<h2 class=\"user\">User</h2>\n<pre>{}</pre>\n",
                    escape(text)
                ));
            }
            Some(EntryKind::Message(MessageRecord::Assistant(a))) => {
                html.push_str("<h2 class=\"assistant\">Assistant</h2>\n");
                for block in &a.blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            html.push_str(&format!("<pre>{}</pre>\n", escape(text)));
                        }
                        ContentBlock::Thinking { text, .. } => {
                            html.push_str(&format!(
                                "<details><summary>thinking</summary><pre>{}</pre></details>\n",
                                escape(text)
                            ));
                        }
                        ContentBlock::ToolCall(tc) => {
                            html.push_str(&format!(
                                "<p class=\"tool\">tool call: <b>{}</b> {}</p>\n",
                                escape(&tc.name),
                                escape(&tc.arguments.to_string())
                            ));
                        }
                    }
                }
            }
            Some(EntryKind::ToolResult(r)) => {
                let class = if r.is_error { "error" } else { "tool" };
                let text: String = r
                    .blocks
                    .iter()
                    .filter_map(|b| match b {
                        ResultBlock::Text { text } => Some(text.as_str()),
                        ResultBlock::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                html.push_str(&format!(
                    "<p class=\"{class}\">tool result ({})</p>\n<pre>{}</pre>\n",
                    escape(r.tool_name.as_deref().unwrap_or("?")),
                    escape(&text)
                ));
            }
            Some(EntryKind::BashExecution(b)) => {
                html.push_str(&format!(
                    "<h2 class=\"tool\">Shell</h2>\n<pre>$ {}\n{}</pre>\n",
                    escape(&b.command),
                    escape(&b.output)
                ));
            }
            Some(EntryKind::Compaction(c)) => {
                html.push_str(&format!(
                    "<details><summary>compaction ({} tokens summarised)</summary><pre>{}</pre></details>\n",
                    c.tokens_before,
                    escape(&c.summary)
                ));
            }
            None => {}
        }
    }
    html.push_str("</body>\n</html>\n");

    let mut file = std::fs::File::create(out_path)?;
    file.write_all(html.as_bytes())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
