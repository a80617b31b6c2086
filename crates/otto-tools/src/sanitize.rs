// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Output sanitisation for process-produced text.
//!
//! Sub-process output goes straight into model context and the session log,
//! so ANSI escapes, carriage returns and binary garbage are stripped first.

/// Strip ANSI escape sequences, drop NUL and other C0 control characters
/// (keeping `\n` and `\t`), and remove CR entirely.
pub fn sanitize_output(s: &str) -> String {
    let stripped = strip_ansi_escapes::strip_str(s);
    stripped
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || ((c as u32) >= 0x20 && c != '\u{7f}'))
        .collect()
}

/// Tail-truncate `s` to at most `limit` bytes on a char boundary, prefixed
/// with an omission marker when anything was dropped.
pub fn tail_truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    let omitted = start;
    format!("...[{omitted} bytes omitted]...\n{}", &s[start..])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
