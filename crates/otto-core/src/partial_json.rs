// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tolerant parsing of streamed JSON prefixes.
//!
//! Tool-call arguments arrive as fragments of one JSON document.  This
//! parser yields the largest legal JSON subtree constructible from the
//! bytes seen so far, so progress observers get a structured value long
//! before the document is complete.  The contract is only best-effort: it
//! never fails on a prefix of valid JSON, and the canonical parse still
//! comes from the finished buffer.

use serde_json::{Map, Number, Value};

/// Parse a (possibly incomplete) JSON document prefix.
///
/// Returns `None` when the buffer holds nothing reconstructible (empty,
/// whitespace, or leading garbage).
pub fn parse_partial_json(input: &str) -> Option<Value> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    if p.at_end() {
        return None;
    }
    p.parse_value()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            b'{' => self.parse_object(),
            b'[' => self.parse_array(),
            b'"' => self.parse_string().map(Value::String),
            b't' | b'f' | b'n' => self.parse_literal(),
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => None,
        }
    }

    fn parse_object(&mut self) -> Option<Value> {
        self.pos += 1; // consume '{'
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Some(Value::Object(map)), // truncated: close here
                Some(b'}') => {
                    self.pos += 1;
                    return Some(Value::Object(map));
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'"') => {
                    let key = match self.parse_string() {
                        Some(k) => k,
                        // Truncated inside the key: drop the pair.
                        None => return Some(Value::Object(map)),
                    };
                    self.skip_ws();
                    if self.peek() != Some(b':') {
                        // Key with no value yet: drop the pair.
                        return Some(Value::Object(map));
                    }
                    self.pos += 1;
                    self.skip_ws();
                    if self.at_end() {
                        return Some(Value::Object(map));
                    }
                    match self.parse_value() {
                        Some(v) => {
                            map.insert(key, v);
                        }
                        None => return Some(Value::Object(map)),
                    }
                }
                Some(_) => return Some(Value::Object(map)),
            }
        }
    }

    fn parse_array(&mut self) -> Option<Value> {
        self.pos += 1; // consume '['
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Some(Value::Array(items)),
                Some(b']') => {
                    self.pos += 1;
                    return Some(Value::Array(items));
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(_) => match self.parse_value() {
                    Some(v) => items.push(v),
                    None => return Some(Value::Array(items)),
                },
            }
        }
    }

    /// Parse a string; a missing closing quote returns the content so far.
    /// Returns `None` only when the buffer ends inside an escape sequence
    /// whose expansion is still ambiguous.
    fn parse_string(&mut self) -> Option<String> {
        self.pos += 1; // consume '"'
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Some(out), // unterminated: best effort
                Some(b'"') => {
                    self.pos += 1;
                    return Some(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Some(out), // trailing backslash: drop it
                        Some(c) => {
                            self.pos += 1;
                            match c {
                                b'"' => out.push('"'),
                                b'\\' => out.push('\\'),
                                b'/' => out.push('/'),
                                b'b' => out.push('\u{8}'),
                                b'f' => out.push('\u{c}'),
                                b'n' => out.push('\n'),
                                b'r' => out.push('\r'),
                                b't' => out.push('\t'),
                                b'u' => {
                                    if self.pos + 4 <= self.bytes.len() {
                                        let hex =
                                            std::str::from_utf8(&self.bytes[self.pos..self.pos + 4])
                                                .ok()?;
                                        if let Some(ch) = u32::from_str_radix(hex, 16)
                                            .ok()
                                            .and_then(char::from_u32)
                                        {
                                            out.push(ch);
                                        }
                                        self.pos += 4;
                                    } else {
                                        // Partial \uXXXX: drop it.
                                        self.pos = self.bytes.len();
                                        return Some(out);
                                    }
                                }
                                other => {
                                    // Invalid escape; keep it verbatim so no
                                    // input can make us fail.
                                    out.push('\\');
                                    out.push(other as char);
                                }
                            }
                        }
                    }
                }
                Some(_) => {
                    // Consume one UTF-8 scalar.
                    let start = self.pos;
                    self.pos += 1;
                    while self.pos < self.bytes.len() && (self.bytes[self.pos] & 0xc0) == 0x80 {
                        self.pos += 1;
                    }
                    match std::str::from_utf8(&self.bytes[start..self.pos]) {
                        Ok(s) => out.push_str(s),
                        // Truncated multi-byte scalar at end of buffer.
                        Err(_) => return Some(out),
                    }
                }
            }
        }
    }

    /// `true` / `false` / `null`, completing unambiguous prefixes.
    fn parse_literal(&mut self) -> Option<Value> {
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            let rest = &self.bytes[self.pos..];
            let take = rest.len().min(word.len());
            if word.as_bytes()[..take] == rest[..take] {
                self.pos += take;
                return Some(value);
            }
        }
        None
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        // Trim trailing characters that cannot end a JSON number yet
        // ("1e", "2.", "-") down to the longest valid prefix.
        let mut end = text.len();
        while end > 0 {
            if let Ok(n) = text[..end].parse::<f64>() {
                if text[..end]
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_ascii_digit())
                {
                    return Number::from_f64(n).map(normalise_number);
                }
            }
            end -= 1;
        }
        None
    }
}

/// Keep integers as integers; serde's `from_f64` always builds a float.
fn normalise_number(n: Number) -> Value {
    if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Value::Number(Number::from(f as i64));
        }
    }
    Value::Number(n)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
