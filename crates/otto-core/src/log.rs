// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The append-only session log: one JSONL file per session, one entry per
//! line, entries never rewritten in place.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use otto_model::{ContentBlock, ResultBlock, StopReason, Usage};

use crate::error::CoreError;
use crate::ids::{cwd_hash, EntryIdGen};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Always the first entry of a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

/// A finalised assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantRecord {
    pub blocks: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: StopReason,
    /// Wall-clock duration of the streaming turn, milliseconds.
    pub duration_ms: u64,
    pub model: String,
}

/// A user or assistant conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum MessageRecord {
    User {
        text: String,
        /// Image attachments as data URLs.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    Assistant(AssistantRecord),
}

/// Result of one tool call, persisted after execution finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub blocks: Vec<ResultBlock>,
    pub is_error: bool,
    /// Tool-specific structured payload (exit codes, diffs, spool paths).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A user-driven shell invocation, kept in history for context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BashRecord {
    pub command: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub cancelled: bool,
}

/// Marks a compaction cut-point: everything before `first_kept_entry_id`
/// is replaced by `summary` when history is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub summary: String,
    pub tokens_before: u64,
    /// Entry id of the previous compaction, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_entry_id: Option<String>,
    pub first_kept_entry_id: String,
}

/// The known, typed entry payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EntryKind {
    Session(SessionHeader),
    Message(MessageRecord),
    ToolResult(ToolResultRecord),
    BashExecution(BashRecord),
    Compaction(CompactionRecord),
}

/// Entry payload: a known kind, or an extension-defined entry preserved
/// verbatim (its own `type` discriminator travels inside the value).
#[derive(Debug, Clone, PartialEq)]
pub enum EntryBody {
    Known(EntryKind),
    Custom(Value),
}

/// One persisted line of the session log.
///
/// On disk the envelope fields (`id`, `at`) sit beside the payload's own
/// fields in one flat JSON object; the (de)serializers below fold them in
/// by hand so unknown `type` discriminators survive verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub body: EntryBody,
}

impl Serialize for Entry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;
        let mut value = match &self.body {
            EntryBody::Known(k) => serde_json::to_value(k).map_err(S::Error::custom)?,
            EntryBody::Custom(v) => v.clone(),
        };
        let map = value
            .as_object_mut()
            .ok_or_else(|| S::Error::custom("entry payload must be a JSON object"))?;
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert(
            "at".into(),
            serde_json::to_value(self.at).map_err(S::Error::custom)?,
        );
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let mut value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| D::Error::custom("entry line must be a JSON object"))?;
        let id = match obj.remove("id") {
            Some(Value::String(s)) => s,
            _ => return Err(D::Error::custom("entry is missing its id")),
        };
        let at = obj
            .remove("at")
            .ok_or_else(|| D::Error::custom("entry is missing its timestamp"))?;
        let at: DateTime<Utc> = serde_json::from_value(at).map_err(D::Error::custom)?;
        let body = match serde_json::from_value::<EntryKind>(value.clone()) {
            Ok(kind) => EntryBody::Known(kind),
            Err(_) => EntryBody::Custom(value),
        };
        Ok(Entry { id, at, body })
    }
}

impl Entry {
    pub fn kind(&self) -> Option<&EntryKind> {
        match &self.body {
            EntryBody::Known(k) => Some(k),
            EntryBody::Custom(_) => None,
        }
    }

    pub fn as_compaction(&self) -> Option<&CompactionRecord> {
        match self.kind() {
            Some(EntryKind::Compaction(c)) => Some(c),
            _ => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantRecord> {
        match self.kind() {
            Some(EntryKind::Message(MessageRecord::Assistant(a))) => Some(a),
            _ => None,
        }
    }

    pub fn is_user_message(&self) -> bool {
        matches!(
            self.kind(),
            Some(EntryKind::Message(MessageRecord::User { .. }))
        )
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.kind(), Some(EntryKind::ToolResult(_)))
    }

    /// Entries whose loss would break tool-call pairing are flushed to disk
    /// before `append` returns.
    fn is_durable(&self) -> bool {
        matches!(
            self.kind(),
            Some(EntryKind::Session(_))
                | Some(EntryKind::Message(MessageRecord::Assistant(_)))
                | Some(EntryKind::ToolResult(_))
                | Some(EntryKind::Compaction(_))
        )
    }
}

// ─── The log ─────────────────────────────────────────────────────────────────

/// Append-only store for one session.  Single writer in the steady state;
/// loaders and forks read the file independently.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    session_id: String,
    cwd: PathBuf,
    ids: EntryIdGen,
    /// In-memory mirror of the on-disk entries, in insertion order.
    entries: Vec<Entry>,
}

impl SessionLog {
    /// Create a fresh session for `cwd` under `base_dir`.
    pub fn create(base_dir: &Path, cwd: &Path) -> Result<Self, CoreError> {
        let dir = sessions_dir(base_dir, cwd);
        std::fs::create_dir_all(&dir)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let path = dir.join(format!("{session_id}.jsonl"));
        let mut log = Self {
            path,
            session_id: session_id.clone(),
            cwd: cwd.to_path_buf(),
            ids: EntryIdGen::new(),
            entries: Vec::new(),
        };
        log.append(EntryKind::Session(SessionHeader {
            session_id,
            created_at: Utc::now(),
            cwd: cwd.to_string_lossy().into_owned(),
            parent_session_id: None,
        }))?;
        Ok(log)
    }

    /// Open an existing session file.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let entries = Self::load_all(path)?;
        let header = entries
            .iter()
            .find_map(|e| match e.kind() {
                Some(EntryKind::Session(h)) => Some(h.clone()),
                _ => None,
            })
            .ok_or_else(|| CoreError::Storage(format!("{}: no session header", path.display())))?;
        let ids = entries
            .last()
            .map(|e| EntryIdGen::resume_after(&e.id))
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            session_id: header.session_id,
            cwd: PathBuf::from(header.cwd),
            ids,
            entries,
        })
    }

    /// Read every entry of a session file in insertion order.  Malformed
    /// lines are skipped with a warning rather than failing the load.
    pub fn load_all(path: &Path) -> Result<Vec<Entry>, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Entry>(line) {
                Ok(e) => entries.push(e),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed log line"),
            }
        }
        Ok(entries)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Append a typed entry.  Durably flushed before returning for entries
    /// whose loss would break pairing (header, assistant messages, tool
    /// results, compactions).
    pub fn append(&mut self, kind: EntryKind) -> Result<&Entry, CoreError> {
        self.append_body(EntryBody::Known(kind))
    }

    /// Append an extension-defined entry verbatim.  The value should carry
    /// its own `type` discriminator.
    pub fn append_custom(&mut self, value: Value) -> Result<&Entry, CoreError> {
        self.append_body(EntryBody::Custom(value))
    }

    fn append_body(&mut self, body: EntryBody) -> Result<&Entry, CoreError> {
        let entry = Entry {
            id: self.ids.next(),
            at: Utc::now(),
            body,
        };
        let line = serde_json::to_string(&entry).map_err(CoreError::storage)?;

        // Open/close per append keeps the inode stable across rotations.
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(CoreError::storage)?;
        file.write_all(line.as_bytes()).map_err(CoreError::storage)?;
        file.write_all(b"\n").map_err(CoreError::storage)?;
        if entry.is_durable() {
            file.sync_data().map_err(CoreError::storage)?;
        }

        self.entries.push(entry);
        Ok(self.entries.last().expect("just pushed"))
    }

    /// The most recent compaction entry, if any.
    pub fn latest_compaction(&self) -> Option<&Entry> {
        self.entries.iter().rev().find(|e| e.as_compaction().is_some())
    }

    /// The live suffix: entries at or after the latest compaction cut-point
    /// (excluding the header and the compaction entry itself).
    pub fn live_suffix(&self) -> (&[Entry], Option<&CompactionRecord>) {
        match self.latest_compaction() {
            Some(entry) => {
                let record = entry.as_compaction().expect("checked");
                let start = self
                    .entries
                    .iter()
                    .position(|e| e.id == record.first_kept_entry_id)
                    .unwrap_or(self.entries.len());
                (&self.entries[start..], Some(record))
            }
            None => (&self.entries[..], None),
        }
    }

    /// Copy entries `[0, up_to_entry_id]` into a new session file with a
    /// rewritten header.  A pure log operation: every copied entry other
    /// than the header is byte-identical.
    pub fn fork(&self, up_to_entry_id: &str) -> Result<PathBuf, CoreError> {
        let cut = self
            .entries
            .iter()
            .position(|e| e.id == up_to_entry_id)
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("unknown entry id: {up_to_entry_id}"))
            })?;

        let new_id = uuid::Uuid::new_v4().to_string();
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let new_path = dir.join(format!("{new_id}.jsonl"));

        let mut lines = String::new();
        for entry in &self.entries[..=cut] {
            let rewritten = match entry.kind() {
                Some(EntryKind::Session(h)) => Entry {
                    id: entry.id.clone(),
                    at: Utc::now(),
                    body: EntryBody::Known(EntryKind::Session(SessionHeader {
                        session_id: new_id.clone(),
                        created_at: Utc::now(),
                        cwd: h.cwd.clone(),
                        parent_session_id: Some(self.session_id.clone()),
                    })),
                },
                _ => entry.clone(),
            };
            lines.push_str(&serde_json::to_string(&rewritten).map_err(CoreError::storage)?);
            lines.push('\n');
        }
        let mut file = std::fs::File::create(&new_path).map_err(CoreError::storage)?;
        file.write_all(lines.as_bytes()).map_err(CoreError::storage)?;
        file.sync_data().map_err(CoreError::storage)?;
        Ok(new_path)
    }
}

/// Session directory for a working directory under `base_dir`.
pub fn sessions_dir(base_dir: &Path, cwd: &Path) -> PathBuf {
    base_dir.join(cwd_hash(cwd))
}

/// Most recently modified session file for `cwd`, for `session --continue`.
pub fn most_recent_session(base_dir: &Path, cwd: &Path) -> Option<PathBuf> {
    let dir = sessions_dir(base_dir, cwd);
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let modified = entry.metadata().ok()?.modified().ok()?;
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, p)| p)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_log(dir: &tempfile::TempDir) -> SessionLog {
        SessionLog::create(dir.path(), Path::new("/work/project")).unwrap()
    }

    fn user(text: &str) -> EntryKind {
        EntryKind::Message(MessageRecord::User {
            text: text.into(),
            attachments: vec![],
        })
    }

    fn assistant(text: &str, stop: StopReason) -> EntryKind {
        EntryKind::Message(MessageRecord::Assistant(AssistantRecord {
            blocks: vec![ContentBlock::text(text)],
            usage: Usage::default(),
            stop_reason: stop,
            duration_ms: 5,
            model: "m".into(),
        }))
    }

    // ── Creation and round-trip ───────────────────────────────────────────────

    #[test]
    fn create_writes_header_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = new_log(&dir);
        let entries = SessionLog::load_all(log.path()).unwrap();
        assert_eq!(entries.len(), 1);
        match entries[0].kind() {
            Some(EntryKind::Session(h)) => {
                assert_eq!(h.session_id, log.session_id());
                assert_eq!(h.cwd, "/work/project");
                assert!(h.parent_session_id.is_none());
            }
            other => panic!("unexpected first entry: {other:?}"),
        }
    }

    #[test]
    fn entries_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("hello")).unwrap();
        log.append(assistant("hi", StopReason::Stop)).unwrap();
        log.append(EntryKind::ToolResult(ToolResultRecord {
            tool_call_id: "tc1".into(),
            tool_name: Some("ls".into()),
            blocks: vec![ResultBlock::text("a.txt")],
            is_error: false,
            details: Some(json!({"exitCode": 0})),
        }))
        .unwrap();

        let loaded = SessionLog::load_all(log.path()).unwrap();
        assert_eq!(loaded, log.entries());
    }

    #[test]
    fn line_discriminators_match_the_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("x")).unwrap();
        let raw = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert!(lines[0].contains(r#""type":"session""#));
        assert!(lines[1].contains(r#""type":"message""#));
        assert!(lines[1].contains(r#""role":"user""#));
    }

    #[test]
    fn ids_are_monotone_within_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        for i in 0..20 {
            log.append(user(&format!("m{i}"))).unwrap();
        }
        let ids: Vec<&str> = log.entries().iter().map(|e| e.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    // ── Custom entries ────────────────────────────────────────────────────────

    #[test]
    fn custom_entries_are_preserved_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append_custom(json!({
            "type": "my-extension-note",
            "payload": {"answer": 42}
        }))
        .unwrap();
        let loaded = SessionLog::load_all(log.path()).unwrap();
        match &loaded[1].body {
            EntryBody::Custom(v) => {
                assert_eq!(v["type"], "my-extension-note");
                assert_eq!(v["payload"]["answer"], 42);
            }
            other => panic!("expected custom entry, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("ok")).unwrap();
        let mut raw = std::fs::read_to_string(log.path()).unwrap();
        raw.push_str("{this is not json\n");
        std::fs::write(log.path(), raw).unwrap();
        let loaded = SessionLog::load_all(log.path()).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    // ── Compaction bookkeeping ────────────────────────────────────────────────

    #[test]
    fn latest_compaction_and_live_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("one")).unwrap();
        log.append(assistant("a1", StopReason::Stop)).unwrap();
        let kept = log.append(user("two")).unwrap().id.clone();
        log.append(EntryKind::Compaction(CompactionRecord {
            summary: "earlier stuff".into(),
            tokens_before: 100,
            parent_entry_id: None,
            first_kept_entry_id: kept.clone(),
        }))
        .unwrap();
        log.append(assistant("a2", StopReason::Stop)).unwrap();

        let (suffix, record) = log.live_suffix();
        assert_eq!(record.unwrap().summary, "earlier stuff");
        assert!(suffix[0].is_user_message());
        assert_eq!(suffix[0].id, kept);
        // Suffix runs to the end of the log.
        assert!(suffix.last().unwrap().as_assistant().is_some());
    }

    #[test]
    fn live_suffix_without_compaction_is_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("m")).unwrap();
        let (suffix, record) = log.live_suffix();
        assert!(record.is_none());
        assert_eq!(suffix.len(), 2);
    }

    // ── Fork ──────────────────────────────────────────────────────────────────

    #[test]
    fn fork_truncates_and_rewrites_only_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = new_log(&dir);
        log.append(user("u1")).unwrap();
        log.append(assistant("a1", StopReason::Stop)).unwrap();
        let u2 = log.append(user("u2")).unwrap().id.clone();
        log.append(assistant("a2", StopReason::Stop)).unwrap();

        let forked_path = log.fork(&u2).unwrap();
        let forked = SessionLog::load_all(&forked_path).unwrap();
        let original = log.entries();

        // Prefix of the original truncated at u2.
        assert_eq!(forked.len(), 4);
        for (f, o) in forked.iter().zip(original.iter()).skip(1) {
            assert_eq!(f, o, "non-header entries are byte-identical");
        }
        match forked[0].kind() {
            Some(EntryKind::Session(h)) => {
                assert_eq!(h.parent_session_id.as_deref(), Some(log.session_id()));
                assert_ne!(h.session_id, log.session_id());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fork_unknown_entry_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let log = new_log(&dir);
        assert!(matches!(
            log.fork("0000000000000-00099"),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    // ── Directory layout ──────────────────────────────────────────────────────

    #[test]
    fn different_cwds_use_different_directories() {
        let dir = tempfile::tempdir().unwrap();
        let a = SessionLog::create(dir.path(), Path::new("/proj/a")).unwrap();
        let b = SessionLog::create(dir.path(), Path::new("/proj/b")).unwrap();
        assert_ne!(a.path().parent(), b.path().parent());
    }

    #[test]
    fn most_recent_session_finds_the_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = Path::new("/proj/a");
        let _old = SessionLog::create(dir.path(), cwd).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = SessionLog::create(dir.path(), cwd).unwrap();
        let found = most_recent_session(dir.path(), cwd).unwrap();
        assert_eq!(found, newer.path());
    }

    #[test]
    fn open_resumes_id_generation_past_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut log = new_log(&dir);
            log.append(user("u1")).unwrap();
            log.path().to_path_buf()
        };
        let mut reopened = SessionLog::open(&path).unwrap();
        let last_existing = reopened.entries().last().unwrap().id.clone();
        let fresh = reopened.append(user("u2")).unwrap().id.clone();
        assert!(fresh > last_existing);
    }
}
