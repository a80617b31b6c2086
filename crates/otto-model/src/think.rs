// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-band `<think>…</think>` handling for providers that emit reasoning as
//! plain text instead of a dedicated reasoning field.

/// A classified span of streamed text.
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkSpan {
    Text(String),
    Thinking(String),
}

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Streaming splitter that routes `<think>` spans out of a text delta
/// stream.  Feed it raw text deltas; it returns classified spans and keeps
/// any partially received tag in an internal buffer until it can be
/// disambiguated.
#[derive(Debug, Default)]
pub struct ThinkSplitter {
    in_think: bool,
    /// Bytes held back because they may be the start of a tag.
    pending: String,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> Vec<ThinkSpan> {
        self.pending.push_str(delta);
        let mut out: Vec<ThinkSpan> = Vec::new();
        loop {
            let tag = if self.in_think { CLOSE } else { OPEN };
            if let Some(pos) = self.pending.find(tag) {
                let before = self.pending[..pos].to_string();
                self.emit(&mut out, before);
                self.pending.drain(..pos + tag.len());
                self.in_think = !self.in_think;
                continue;
            }
            // No complete tag.  Hold back a suffix that could be a tag prefix
            // so a tag split across deltas is not emitted as content.
            let keep = longest_tag_prefix_suffix(&self.pending, tag);
            let emit_len = self.pending.len() - keep;
            if emit_len > 0 {
                let chunk = self.pending[..emit_len].to_string();
                self.emit(&mut out, chunk);
                self.pending.drain(..emit_len);
            }
            break;
        }
        out
    }

    /// Flush whatever is buffered at end of stream.  An unclosed `<think>`
    /// block (model truncated) flushes as thinking.
    pub fn finish(mut self) -> Vec<ThinkSpan> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        self.emit(&mut out, rest);
        out
    }

    fn emit(&self, out: &mut Vec<ThinkSpan>, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        let span = if self.in_think {
            ThinkSpan::Thinking(chunk)
        } else {
            ThinkSpan::Text(chunk)
        };
        // Coalesce with the previous span of the same kind.
        match (out.last_mut(), &span) {
            (Some(ThinkSpan::Text(a)), ThinkSpan::Text(b)) => a.push_str(b),
            (Some(ThinkSpan::Thinking(a)), ThinkSpan::Thinking(b)) => a.push_str(b),
            _ => out.push(span),
        }
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `tag`.
fn longest_tag_prefix_suffix(s: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(s.len());
    for len in (1..=max).rev() {
        if s.is_char_boundary(s.len() - len) && tag.starts_with(&s[s.len() - len..]) {
            return len;
        }
    }
    0
}

/// Strip `<think>` / `</think>` wrapper tags from an accumulated thinking
/// block.  Some serving layers forget to strip them before placing the text
/// in the reasoning field.
pub fn strip_think_wrappers(s: &str) -> String {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix(OPEN).unwrap_or(trimmed);
    let inner = inner.strip_suffix(CLOSE).unwrap_or(inner);
    inner.trim().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(deltas: &[&str]) -> Vec<ThinkSpan> {
        let mut sp = ThinkSplitter::new();
        let mut out = Vec::new();
        for d in deltas {
            out.extend(sp.push(d));
        }
        out.extend(sp.finish());
        // Merge adjacent spans of the same kind across push boundaries for
        // stable assertions.
        let mut merged: Vec<ThinkSpan> = Vec::new();
        for s in out {
            match (merged.last_mut(), &s) {
                (Some(ThinkSpan::Text(a)), ThinkSpan::Text(b)) => a.push_str(b),
                (Some(ThinkSpan::Thinking(a)), ThinkSpan::Thinking(b)) => a.push_str(b),
                _ => merged.push(s),
            }
        }
        merged
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            split_all(&["hello ", "world"]),
            vec![ThinkSpan::Text("hello world".into())]
        );
    }

    #[test]
    fn think_block_is_reclassified() {
        assert_eq!(
            split_all(&["<think>deep</think>answer"]),
            vec![
                ThinkSpan::Thinking("deep".into()),
                ThinkSpan::Text("answer".into())
            ]
        );
    }

    #[test]
    fn tag_split_across_deltas_is_not_leaked() {
        assert_eq!(
            split_all(&["<th", "ink>a</th", "ink>b"]),
            vec![ThinkSpan::Thinking("a".into()), ThinkSpan::Text("b".into())]
        );
    }

    #[test]
    fn unclosed_think_flushes_as_thinking() {
        assert_eq!(
            split_all(&["<think>never closed"]),
            vec![ThinkSpan::Thinking("never closed".into())]
        );
    }

    #[test]
    fn angle_bracket_text_that_is_not_a_tag_is_kept() {
        assert_eq!(
            split_all(&["a < b and a <thermometer>"]),
            vec![ThinkSpan::Text("a < b and a <thermometer>".into())]
        );
    }

    #[test]
    fn strip_wrappers_removes_tags_and_trims() {
        assert_eq!(strip_think_wrappers("<think>\nStep 1\n</think>"), "Step 1");
        assert_eq!(strip_think_wrappers("no tags"), "no tags");
    }
}
