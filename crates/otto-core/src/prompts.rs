// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Built-in prompt text.

/// Default system prompt for interactive coding sessions.
pub fn system_prompt(cwd: &std::path::Path) -> String {
    format!(
        "You are otto, an interactive coding agent running in a terminal.\n\
         You help the user by reading and editing files, searching the\n\
         codebase, and running shell commands through the provided tools.\n\
         \n\
         Working directory: {}\n\
         \n\
         Guidelines:\n\
         - Prefer the read/grep/find/ls tools over shell equivalents.\n\
         - Make edits with the edit tool; include enough context to make\n\
           the target substring unique.\n\
         - Keep answers short; the user is watching a terminal.\n",
        cwd.display()
    )
}

/// Prompt used to compact old history into a summary.  The summary replaces
/// the original entries when history is rebuilt, so it must be dense.
pub const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation \
     history in a concise, information-dense way. Preserve all technical details, \
     decisions, file names, code snippets, and tool outputs that may be relevant \
     to future work. The summary will replace the original history to free up \
     context space.";

// ─── Unit tests ──────────────────────────────────────────────────────────────
