// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Composition separator for multi-part credentials (e.g. Google Cloud Code
/// Assist needs `{token, project-id}`).  The dispatcher carries the composed
/// string opaquely.
pub const COMPOSE_SEPARATOR: char = '\u{1}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    ApiKey,
    Oauth,
}

/// One stored provider credential.
///
/// Field names match the on-disk credential file format.  `Debug` is
/// implemented by hand so tokens never reach logs.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub kind: CredentialKind,
    /// Access token or API key.
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    /// Unix timestamp (seconds) when `access` expires.  Absent for keys
    /// that never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            access: key.into(),
            refresh: None,
            expires: None,
            project_id: None,
            enterprise_url: None,
            email: None,
            account_id: None,
        }
    }

    pub fn oauth(
        access: impl Into<String>,
        refresh: impl Into<String>,
        expires: i64,
    ) -> Self {
        Self {
            kind: CredentialKind::Oauth,
            access: access.into(),
            refresh: Some(refresh.into()),
            expires: Some(expires),
            project_id: None,
            enterprise_url: None,
            email: None,
            account_id: None,
        }
    }

    /// Seconds until expiry; `None` for non-expiring credentials.
    pub fn expires_in(&self, now: i64) -> Option<i64> {
        self.expires.map(|e| e - now)
    }

    /// The opaque access string the dispatcher carries.  Multi-part
    /// credentials compose their parts with [`COMPOSE_SEPARATOR`].
    pub fn composed_access(&self) -> String {
        match &self.project_id {
            Some(project) => format!("{}{}{}", self.access, COMPOSE_SEPARATOR, project),
            None => self.access.clone(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .field("expires", &self.expires)
            .field("project_id", &self.project_id)
            .field("email", &self.email)
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_tokens() {
        let c = Credential::oauth("secret-access", "secret-refresh", 123);
        let s = format!("{c:?}");
        assert!(!s.contains("secret-access"));
        assert!(!s.contains("secret-refresh"));
        assert!(s.contains("[REDACTED]"));
    }

    #[test]
    fn composed_access_joins_token_and_project() {
        let mut c = Credential::oauth("tok", "ref", 0);
        c.project_id = Some("proj-1".into());
        assert_eq!(c.composed_access(), format!("tok{COMPOSE_SEPARATOR}proj-1"));
    }

    #[test]
    fn composed_access_is_plain_token_without_project() {
        let c = Credential::api_key("k");
        assert_eq!(c.composed_access(), "k");
    }

    #[test]
    fn serialises_with_camel_case_field_names() {
        let mut c = Credential::oauth("a", "r", 9);
        c.project_id = Some("p".into());
        c.enterprise_url = Some("https://ghe.example".into());
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains(r#""projectId":"p""#), "{json}");
        assert!(json.contains(r#""enterpriseUrl""#), "{json}");
        assert!(json.contains(r#""kind":"oauth""#), "{json}");
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let json = serde_json::to_string(&Credential::api_key("k")).unwrap();
        assert!(!json.contains("refresh"));
        assert!(!json.contains("expires"));
        assert!(!json.contains("projectId"));
    }

    #[test]
    fn expires_in_counts_down_from_now() {
        let c = Credential::oauth("a", "r", 1_000);
        assert_eq!(c.expires_in(400), Some(600));
        assert_eq!(Credential::api_key("k").expires_in(400), None);
    }
}
