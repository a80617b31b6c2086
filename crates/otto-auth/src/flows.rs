// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OAuth flows: provider refresh endpoints, the GitHub Copilot device-code
//! flow, and the Google authorization-code flow with loopback + PKCE.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;

use crate::{AuthError, Credential};

/// Proactive refresh window: refresh when less than 5 minutes remain.
pub const REFRESH_WINDOW_SECS: i64 = 300;

/// Default `expires_in` when a token response omits it (1 hour).
const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;

// ─── Provider endpoint table ─────────────────────────────────────────────────

struct OauthEndpoint {
    provider: &'static str,
    token_url: &'static str,
    client_id: &'static str,
}

/// Refresh endpoints for providers using plain refresh-token grants.
const REFRESH_ENDPOINTS: &[OauthEndpoint] = &[
    OauthEndpoint {
        provider: "anthropic",
        token_url: "https://console.anthropic.com/v1/oauth/token",
        client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
    },
    OauthEndpoint {
        provider: "chatgpt-codex",
        token_url: "https://auth.openai.com/oauth/token",
        client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
    },
    OauthEndpoint {
        provider: "kimi",
        token_url: "https://auth.moonshot.cn/oauth/token",
        client_id: "kimi-cli",
    },
    OauthEndpoint {
        provider: "cursor",
        token_url: "https://api2.cursor.sh/oauth/token",
        client_id: "cursor-cli",
    },
    OauthEndpoint {
        provider: "antigravity",
        token_url: "https://auth.antigravity.dev/oauth/token",
        client_id: "antigravity-cli",
    },
    OauthEndpoint {
        provider: "google",
        token_url: "https://oauth2.googleapis.com/token",
        client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
    },
];

const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform openid email";

fn endpoint_for(provider: &str) -> Option<&'static OauthEndpoint> {
    REFRESH_ENDPOINTS.iter().find(|e| e.provider == provider)
}

// ─── Wire types ──────────────────────────────────────────────────────────────

/// Response from a token endpoint (initial grant and refresh).
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Response from a device authorization endpoint.
#[derive(Debug, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OauthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// A freshly minted access token.
#[derive(Clone)]
pub struct RefreshedToken {
    pub access: String,
    /// Rotated refresh token, when the provider issued one.
    pub refresh: Option<String>,
    /// Unix expiry timestamp (seconds).
    pub expires: i64,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .field("expires", &self.expires)
            .finish()
    }
}

// ─── Refresher boundary ──────────────────────────────────────────────────────

/// The store's refresh boundary, so tests can count endpoint contacts.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: &str,
        credential: &Credential,
    ) -> Result<RefreshedToken, AuthError>;
}

/// Production refresher: plain refresh-token grant against the provider's
/// endpoint from the table above.
pub struct HttpRefresher {
    client: reqwest::Client,
}

impl HttpRefresher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(
        &self,
        provider: &str,
        credential: &Credential,
    ) -> Result<RefreshedToken, AuthError> {
        let endpoint = endpoint_for(provider).ok_or_else(|| AuthError::Misconfigured {
            provider: provider.into(),
            message: "no refresh endpoint registered".into(),
        })?;
        let refresh_token =
            credential
                .refresh
                .as_deref()
                .ok_or_else(|| AuthError::Misconfigured {
                    provider: provider.into(),
                    message: "missing refresh token".into(),
                })?;

        debug!(provider, "refreshing OAuth access token");
        let resp = self
            .client
            .post(endpoint.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", endpoint.client_id),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        if !status.is_success() {
            // 4xx means the grant itself was rejected; the user must log in
            // again.  5xx is transient.
            if status.is_client_error() {
                return Err(AuthError::Unauthorized {
                    provider: provider.into(),
                    message: oauth_error_text(&body),
                });
            }
            return Err(AuthError::Network(format!(
                "refresh endpoint returned {status}"
            )));
        }
        parse_token_response(&body, provider)
    }
}

fn oauth_error_text(body: &str) -> String {
    match serde_json::from_str::<OauthErrorResponse>(body) {
        Ok(e) => e.error_description.unwrap_or(e.error),
        Err(_) => "refresh rejected".into(),
    }
}

fn parse_token_response(body: &str, provider: &str) -> Result<RefreshedToken, AuthError> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::Unauthorized {
            provider: provider.into(),
            message: format!("malformed token response: {e}"),
        })?;
    let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    Ok(RefreshedToken {
        access: parsed.access_token,
        refresh: parsed.refresh_token,
        expires: chrono::Utc::now().timestamp() + expires_in as i64,
    })
}

// ─── GitHub Copilot device-code flow ─────────────────────────────────────────

/// Start the device flow.  The caller shows `user_code` and
/// `verification_uri` to the user, then polls with [`poll_device_flow`].
pub async fn start_device_flow(client: &reqwest::Client) -> Result<DeviceCodeResponse, AuthError> {
    let resp = client
        .post(GITHUB_DEVICE_CODE_URL)
        .header("accept", "application/json")
        .form(&[("client_id", GITHUB_CLIENT_ID), ("scope", "read:user")])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;
    resp.json::<DeviceCodeResponse>()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))
}

/// Poll the token endpoint until the user approves, the code expires, or the
/// server rejects the grant.
pub async fn poll_device_flow(
    client: &reqwest::Client,
    device: &DeviceCodeResponse,
) -> Result<RefreshedToken, AuthError> {
    let interval = device.interval.max(5);
    let deadline =
        std::time::Instant::now() + std::time::Duration::from_secs(device.expires_in.max(60));
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        if std::time::Instant::now() >= deadline {
            return Err(AuthError::Unauthorized {
                provider: "github-copilot".into(),
                message: "device code expired before approval".into(),
            });
        }
        let resp = client
            .post(GITHUB_TOKEN_URL)
            .header("accept", "application/json")
            .form(&[
                ("client_id", GITHUB_CLIENT_ID),
                ("device_code", device.device_code.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        if let Ok(err) = serde_json::from_str::<OauthErrorResponse>(&body) {
            match err.error.as_str() {
                "authorization_pending" => continue,
                "slow_down" => {
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
                _ => {
                    return Err(AuthError::Unauthorized {
                        provider: "github-copilot".into(),
                        message: err.error_description.unwrap_or(err.error),
                    })
                }
            }
        }
        return parse_token_response(&body, "github-copilot");
    }
}

// ─── Google loopback + PKCE flow ─────────────────────────────────────────────

/// PKCE verifier/challenge pair (S256).
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

pub fn generate_pkce() -> Pkce {
    // 32 random bytes, URL-safe base64 without padding, per RFC 7636.
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let challenge =
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    Pkce {
        verifier,
        challenge,
    }
}

/// Run the Google authorization-code flow on a local loopback listener.
///
/// Binds an ephemeral 127.0.0.1 port, returns the browser URL through
/// `on_auth_url`, waits for the single redirect carrying the code, and
/// exchanges it.  The listener serves exactly one request.
pub async fn google_loopback_flow(
    client: &reqwest::Client,
    on_auth_url: impl FnOnce(String),
) -> Result<RefreshedToken, AuthError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{port}/callback");
    let pkce = generate_pkce();
    let endpoint = endpoint_for("google").expect("google endpoint registered");

    let auth_url = format!(
        "{GOOGLE_AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
        endpoint.client_id,
        urlencode(&redirect_uri),
        urlencode(GOOGLE_SCOPES),
        pkce.challenge,
    );
    on_auth_url(auth_url);

    let (mut socket, _) = listener.accept().await?;
    let mut request = vec![0u8; 4096];
    let n = socket.read(&mut request).await?;
    let request = String::from_utf8_lossy(&request[..n]).to_string();
    let code = extract_query_param(&request, "code").ok_or_else(|| AuthError::Unauthorized {
        provider: "google".into(),
        message: "authorization redirect did not carry a code".into(),
    })?;
    let _ = socket
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/html\r\n\r\n<html><body>Authorized. You can close this tab.</body></html>",
        )
        .await;

    let resp = client
        .post(endpoint.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", endpoint.client_id),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;
    let body = resp
        .text()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;
    parse_token_response(&body, "google")
}

/// Extract a query parameter from the first line of a raw HTTP request.
fn extract_query_param(request: &str, key: &str) -> Option<String> {
    let line = request.lines().next()?;
    let path = line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    for pair in query.split('&') {
        let Some((k, v)) = pair.split_once('=') else {
            continue;
        };
        if k == key {
            return Some(urldecode(v));
        }
    }
    None
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(b) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(b);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
