// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal glob matching for file filters (`*.rs`, `**/*.{ts,tsx}`).

use regex::Regex;

/// Compile a glob into an anchored regex.
///
/// Supported syntax: `*` (within one path segment), `**` (across segments),
/// `?`, and `{a,b}` alternation.  Returns `None` for patterns that produce
/// an invalid regex.
pub fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut re = String::with_capacity(glob.len() * 2);
    re.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following slash so `**/x` also matches `x`.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '{' => re.push_str("(?:"),
            '}' => re.push(')'),
            ',' => re.push('|'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Match a path against a glob.  Globs without a slash match against the
/// file name only; globs with a slash match against the whole relative path.
pub fn glob_matches(glob: &str, path: &str) -> bool {
    let target = if glob.contains('/') {
        path
    } else {
        path.rsplit('/').next().unwrap_or(path)
    };
    glob_to_regex(glob).is_some_and(|re| re.is_match(target))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_a_segment() {
        assert!(glob_matches("*.rs", "main.rs"));
        assert!(glob_matches("*.rs", "src/main.rs"));
        assert!(!glob_matches("*.rs", "main.rb"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(glob_matches("**/*.rs", "src/deep/mod.rs"));
        assert!(glob_matches("**/*.rs", "lib.rs"));
        assert!(!glob_matches("src/*.rs", "src/deep/mod.rs"));
    }

    #[test]
    fn braces_alternate() {
        assert!(glob_matches("*.{ts,tsx}", "app.tsx"));
        assert!(glob_matches("*.{ts,tsx}", "app.ts"));
        assert!(!glob_matches("*.{ts,tsx}", "app.js"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_matches("a?.txt", "ab.txt"));
        assert!(!glob_matches("a?.txt", "abc.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        assert!(!glob_matches("a.rs", "axrs"));
    }
}
