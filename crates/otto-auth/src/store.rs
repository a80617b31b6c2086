// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    flows::{HttpRefresher, TokenRefresher, REFRESH_WINDOW_SECS},
    AuthError, Credential, CredentialKind,
};

/// Environment variables consulted for static API keys, by provider id.
const ENV_KEYS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("cerebras", "CEREBRAS_API_KEY"),
    ("xai", "XAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("zai", "ZAI_API_KEY"),
];

/// Process-wide credential cache keyed by provider id.
///
/// Owned by whoever constructs the agent session and threaded explicitly;
/// several sessions may share one store through an `Arc`.
pub struct CredentialStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Credential>>,
    /// Per-provider refresh gates.  A caller that loses the race waits on
    /// the winner's gate, re-checks expiry, and reads the token the winner
    /// wrote, so the refresh endpoint is contacted exactly once.
    refresh_gates: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    refresher: Box<dyn TokenRefresher>,
}

impl CredentialStore {
    /// Open (or lazily create) the store at the default location
    /// `~/.otto/credentials.json`.
    pub fn open_default() -> Result<Self, AuthError> {
        let home = dirs::home_dir().ok_or_else(|| AuthError::Misconfigured {
            provider: "-".into(),
            message: "cannot determine home directory".into(),
        })?;
        Self::open(home.join(".otto").join("credentials.json"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        Self::with_refresher(path, Box::new(HttpRefresher::new()))
    }

    pub fn with_refresher(
        path: impl Into<PathBuf>,
        refresher: Box<dyn TokenRefresher>,
    ) -> Result<Self, AuthError> {
        let path = path.into();
        let entries = load_file(&path)?;
        debug!(providers = entries.len(), path = %path.display(), "credential store loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            refresh_gates: std::sync::Mutex::new(HashMap::new()),
            refresher,
        })
    }

    /// Return the opaque access string for `provider`, refreshing eagerly
    /// when expiry is inside the safety window.
    pub async fn access(&self, provider: &str) -> Result<String, AuthError> {
        // Static keys from the environment win over the file.
        if let Some((_, var)) = ENV_KEYS.iter().find(|(p, _)| *p == provider) {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    return Ok(key);
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        {
            let entries = self.entries.lock().await;
            let cred = entries.get(provider).ok_or_else(|| self.missing(provider))?;
            if cred.kind == CredentialKind::ApiKey || !needs_refresh(cred, now) {
                return Ok(cred.composed_access());
            }
        }
        self.refresh(provider).await
    }

    /// Insert or replace a credential and persist the file.
    pub async fn put(&self, provider: &str, credential: Credential) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().await;
        entries.insert(provider.to_string(), credential);
        write_file(&self.path, &entries)
    }

    /// Remove a provider's credential (logout) and persist.
    pub async fn remove(&self, provider: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().await;
        entries.remove(provider);
        write_file(&self.path, &entries)
    }

    async fn refresh(&self, provider: &str) -> Result<String, AuthError> {
        let gate = {
            let mut gates = self.refresh_gates.lock().expect("refresh gate lock");
            Arc::clone(
                gates
                    .entry(provider.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _held = gate.lock().await;

        // Re-check under the gate: the winner already refreshed for us.
        let now = chrono::Utc::now().timestamp();
        let stale = {
            let entries = self.entries.lock().await;
            let cred = entries.get(provider).ok_or_else(|| self.missing(provider))?;
            if !needs_refresh(cred, now) {
                return Ok(cred.composed_access());
            }
            cred.clone()
        };

        let fresh = self.refresher.refresh(provider, &stale).await?;
        let mut entries = self.entries.lock().await;
        let cred = entries
            .get_mut(provider)
            .ok_or_else(|| self.missing(provider))?;
        cred.access = fresh.access;
        if let Some(rt) = fresh.refresh {
            cred.refresh = Some(rt);
        }
        cred.expires = Some(fresh.expires);
        let composed = cred.composed_access();
        write_file(&self.path, &entries)?;
        debug!(provider, "credential refreshed and persisted");
        Ok(composed)
    }

    fn missing(&self, provider: &str) -> AuthError {
        AuthError::Misconfigured {
            provider: provider.into(),
            message: "no credential stored; authenticate first".into(),
        }
    }
}

fn needs_refresh(cred: &Credential, now: i64) -> bool {
    match cred.expires_in(now) {
        Some(remaining) => remaining < REFRESH_WINDOW_SECS,
        None => false,
    }
}

fn load_file(path: &Path) -> Result<HashMap<String, Credential>, AuthError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt credential file; starting empty");
            Ok(HashMap::new())
        }
    }
}

/// Atomic write: temp file in the same directory, owner-only permissions,
/// then rename over the target.
fn write_file(path: &Path, entries: &HashMap<String, Credential>) -> Result<(), AuthError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let json = serde_json::to_string_pretty(entries).expect("credentials serialise");

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    use std::io::Write;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| AuthError::Io(e.error))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
