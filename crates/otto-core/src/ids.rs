// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sha2::{Digest, Sha256};

/// Generates entry ids of the form `<millis:013>-<seq:05>`.
///
/// Decimal zero-padding makes ids lexicographically sortable in the same
/// order they were generated, which is sufficient for ordering entries
/// across branches.  Backwards clock jumps are clamped so ids stay
/// monotone within one generator.
#[derive(Debug)]
pub struct EntryIdGen {
    last_millis: u64,
    seq: u32,
}

impl EntryIdGen {
    pub fn new() -> Self {
        Self {
            last_millis: 0,
            seq: 0,
        }
    }

    /// Resume after loading a log: never generate ids at or below `last`.
    pub fn resume_after(last: &str) -> Self {
        let millis = last
            .split('-')
            .next()
            .and_then(|m| m.parse::<u64>().ok())
            .unwrap_or(0);
        let seq = last
            .split('-')
            .nth(1)
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        Self {
            last_millis: millis,
            seq,
        }
    }

    pub fn next(&mut self) -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now > self.last_millis {
            self.last_millis = now;
            self.seq = 0;
        } else {
            self.seq += 1;
        }
        format!("{:013}-{:05}", self.last_millis, self.seq)
    }
}

impl Default for EntryIdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory name for a working directory: first 16 hex chars of its
/// SHA-256.  One session directory per cwd keeps concurrent agents in
/// different projects from colliding.
pub fn cwd_hash(cwd: &std::path::Path) -> String {
    let digest = Sha256::digest(cwd.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
