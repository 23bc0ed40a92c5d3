//! OAuth 2.0 for installed applications.
//!
//! Token resolution, most-specific first:
//!
//! 1. **Pre-issued token** (`config.access_token`) — used as-is.
//! 2. **Cached token** (`config.token_path`) still valid for at least
//!    [`EXPIRY_MARGIN_SECS`] and granted every requested scope.
//! 3. **Refresh** — the cached refresh token is exchanged at the client's
//!    `token_uri`; the new access token is written back to the cache.
//! 4. **Consent** — a loopback listener on `127.0.0.1:<random port>` receives
//!    the browser redirect, the `state` parameter is checked, and the
//!    authorisation code is exchanged for tokens.
//!
//! The client secrets file is only read when step 3 or 4 is needed, so a run
//! with a fresh cache works even after the secrets file has been moved.

use crate::config::FetchConfig;
use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// A cached token is refreshed this long before it actually expires.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// ── Client secrets ───────────────────────────────────────────────────────

/// The `installed` (or `web`) block of a Google client secrets file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Read a secrets file downloaded from the Google Cloud console.
    pub fn from_file(path: &Path) -> Result<Self, FetchError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::CredentialsNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                FetchError::InvalidCredentials {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                }
            }
        })?;
        Self::from_json(&raw).map_err(|detail| FetchError::InvalidCredentials {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parse the JSON body of a secrets file.
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let file: SecretsFile = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        file.installed
            .or(file.web)
            .ok_or_else(|| "expected an \"installed\" or \"web\" client block".to_string())
    }
}

// ── Token cache ──────────────────────────────────────────────────────────

/// On-disk token cache.
///
/// `token` is accepted as an alias for `access_token` so a cache written by
/// Google's Python client library is picked up (it lacks `expires_at`, so it
/// is refreshed on first use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenCache {
    /// Load a cache file; a missing or unreadable file is `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Ignoring unreadable token cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist the cache, owner-readable only on Unix.
    pub async fn save(&self, path: &Path) -> Result<(), FetchError> {
        let wrap = |source| FetchError::TokenCacheWrite {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| FetchError::Internal(format!("serialise token cache: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
        }
        tokio::fs::write(path, json).await.map_err(wrap)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(wrap)?;
        }
        debug!("Token cache written to {}", path.display());
        Ok(())
    }

    /// Valid for at least [`EXPIRY_MARGIN_SECS`] more seconds.
    pub fn is_fresh(&self, now: u64) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .is_some_and(|at| at > now.saturating_add(EXPIRY_MARGIN_SECS))
    }

    /// Every requested scope was granted. An empty grant list is trusted.
    pub fn covers(&self, requested: &[String]) -> bool {
        self.scopes.is_empty() || requested.iter().all(|s| self.scopes.contains(s))
    }

    fn from_response(
        resp: TokenResponse,
        prior_refresh: Option<String>,
        requested: &[String],
        now: u64,
    ) -> Self {
        let scopes = resp
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| requested.to_vec());
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(prior_refresh),
            expires_at: resp.expires_in.map(|secs| now + secs),
            scopes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Resolve a bearer token for the Sheets and Drive APIs.
pub async fn authenticate(config: &FetchConfig) -> Result<String, FetchError> {
    if let Some(ref token) = config.access_token {
        debug!("Using pre-issued access token");
        return Ok(token.clone());
    }

    let now = unix_now();
    let cached = TokenCache::load(&config.token_path);

    if let Some(ref cache) = cached {
        if cache.is_fresh(now) && cache.covers(&config.scopes) {
            debug!("Using cached token from {}", config.token_path.display());
            return Ok(cache.access_token.clone());
        }
    }

    let secrets = ClientSecrets::from_file(&config.credentials_path)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|e| FetchError::AuthFailed(e.to_string()))?;

    if let Some(cache) = cached.filter(|c| c.covers(&config.scopes)) {
        if let Some(refresh) = cache.refresh_token.clone() {
            match refresh_token(&http, &secrets, &refresh).await {
                Ok(resp) => {
                    info!("Refreshed access token");
                    let fresh = TokenCache::from_response(resp, Some(refresh), &config.scopes, now);
                    fresh.save(&config.token_path).await?;
                    return Ok(fresh.access_token);
                }
                Err(e) => warn!("Token refresh failed ({e}); starting consent flow"),
            }
        }
    }

    let resp = consent_flow(&http, &secrets, config).await?;
    let fresh = TokenCache::from_response(resp, None, &config.scopes, unix_now());
    fresh.save(&config.token_path).await?;
    info!("Authorised; token cached at {}", config.token_path.display());
    Ok(fresh.access_token)
}

async fn refresh_token(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    refresh: &str,
) -> Result<TokenResponse, FetchError> {
    let form = [
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];
    post_token(http, &secrets.token_uri, &form).await
}

async fn exchange_code(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, FetchError> {
    let form = [
        ("code", code),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
    ];
    post_token(http, &secrets.token_uri, &form).await
}

async fn post_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, FetchError> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| FetchError::AuthFailed(format!("POST {token_uri}: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::AuthFailed(e.to_string()))?;
    if !status.is_success() {
        return Err(FetchError::AuthFailed(format!("HTTP {status}: {body}")));
    }
    serde_json::from_str(&body)
        .map_err(|e| FetchError::AuthFailed(format!("unexpected token response: {e}")))
}

// ── Consent flow ─────────────────────────────────────────────────────────

/// Build the browser consent URL.
pub fn consent_url(
    secrets: &ClientSecrets,
    scopes: &[String],
    redirect_uri: &str,
    state: &str,
) -> Result<String, FetchError> {
    let scope = scopes.join(" ");
    reqwest::Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map(String::from)
    .map_err(|e| FetchError::AuthFailed(format!("bad auth_uri '{}': {e}", secrets.auth_uri)))
}

/// What the browser sent to the loopback listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Code { code: String, state: String },
    Denied(String),
    /// Unrelated request (e.g. `/favicon.ico`).
    Ignored,
}

/// Interpret the request target of a redirect (`/?code=…&state=…`).
pub fn parse_redirect(target: &str) -> Redirect {
    let Ok(url) = reqwest::Url::parse(&format!("http://127.0.0.1{target}")) else {
        return Redirect::Ignored;
    };
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => error = Some(v.into_owned()),
            _ => {}
        }
    }
    match (code, error) {
        (Some(code), _) => Redirect::Code {
            code,
            state: state.unwrap_or_default(),
        },
        (None, Some(err)) => Redirect::Denied(err),
        (None, None) => Redirect::Ignored,
    }
}

async fn consent_flow(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    config: &FetchConfig,
) -> Result<TokenResponse, FetchError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| FetchError::AuthFailed(format!("loopback listener: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| FetchError::AuthFailed(e.to_string()))?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let state = uuid::Uuid::new_v4().simple().to_string();
    let url = consent_url(secrets, &config.scopes, &redirect_uri, &state)?;

    info!("Waiting for OAuth consent on {}", redirect_uri);
    match config.progress_callback {
        Some(ref cb) => cb.on_consent_required(&url),
        None => eprintln!("{}", crate::progress::consent_prompt(&url)),
    }

    let secs = config.auth_timeout_secs;
    let redirect = tokio::time::timeout(Duration::from_secs(secs), accept_redirect(&listener));
    let (code, got_state) = redirect
        .await
        .map_err(|_| FetchError::AuthTimeout { secs })??;

    if got_state != state {
        return Err(FetchError::AuthFailed(
            "OAuth state mismatch; the redirect did not come from this run".into(),
        ));
    }

    exchange_code(http, secrets, &code, &redirect_uri).await
}

async fn accept_redirect(listener: &TcpListener) -> Result<(String, String), FetchError> {
    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| FetchError::AuthFailed(e.to_string()))?;

        let mut buf = vec![0u8; 8192];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!("loopback read failed: {e}");
                continue;
            }
        };
        let request = String::from_utf8_lossy(&buf[..n]);
        let target = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/");

        let (status, body, outcome) = match parse_redirect(target) {
            Redirect::Code { code, state } => (
                "200 OK",
                "Authorisation complete. You can close this window.",
                Some(Ok((code, state))),
            ),
            Redirect::Denied(err) => (
                "200 OK",
                "Authorisation was denied. You can close this window.",
                Some(Err(FetchError::AuthFailed(format!("consent denied: {err}")))),
            ),
            Redirect::Ignored => ("404 Not Found", "", None),
        };

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;

        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALLED: &str = r#"{
        "installed": {
            "client_id": "123.apps.googleusercontent.com",
            "client_secret": "shh",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    fn scopes() -> Vec<String> {
        crate::config::DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_installed_secrets() {
        let s = ClientSecrets::from_json(INSTALLED).unwrap();
        assert_eq!(s.client_id, "123.apps.googleusercontent.com");
        assert_eq!(s.client_secret, "shh");
        assert_eq!(s.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn parses_web_secrets_with_defaults() {
        let s = ClientSecrets::from_json(r#"{"web":{"client_id":"abc"}}"#).unwrap();
        assert_eq!(s.client_id, "abc");
        assert_eq!(s.auth_uri, DEFAULT_AUTH_URI);
    }

    #[test]
    fn rejects_unknown_secrets_shape() {
        let err = ClientSecrets::from_json(r#"{"service_account":{}}"#).unwrap_err();
        assert!(err.contains("installed"));
    }

    #[test]
    fn missing_secrets_file_is_credentials_not_found() {
        let err = ClientSecrets::from_file(Path::new("/nonexistent/creds.json")).unwrap_err();
        assert!(matches!(err, FetchError::CredentialsNotFound { .. }));
    }

    #[test]
    fn freshness_respects_margin() {
        let cache = TokenCache {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: Some(1_000),
            scopes: vec![],
        };
        assert!(cache.is_fresh(900));
        assert!(!cache.is_fresh(940));
        assert!(!cache.is_fresh(2_000));

        let no_expiry = TokenCache {
            expires_at: None,
            ..cache
        };
        assert!(!no_expiry.is_fresh(0));
    }

    #[test]
    fn python_style_cache_is_accepted() {
        let raw = r#"{"token":"ya29.x","refresh_token":"1//r","scopes":["https://www.googleapis.com/auth/drive.readonly"],"expiry":"2024-01-01T00:00:00Z"}"#;
        let cache: TokenCache = serde_json::from_str(raw).unwrap();
        assert_eq!(cache.access_token, "ya29.x");
        assert_eq!(cache.refresh_token.as_deref(), Some("1//r"));
        assert!(!cache.is_fresh(0));
        assert!(cache.covers(&scopes()));
        assert!(!cache.covers(&["https://www.googleapis.com/auth/drive".to_string()]));
    }

    #[test]
    fn response_keeps_prior_refresh_token() {
        let resp = TokenResponse {
            access_token: "new".into(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: None,
        };
        let cache = TokenCache::from_response(resp, Some("old-refresh".into()), &scopes(), 100);
        assert_eq!(cache.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(cache.expires_at, Some(3700));
        assert!(cache.covers(&scopes()));
    }

    #[test]
    fn consent_url_carries_parameters() {
        let s = ClientSecrets::from_json(INSTALLED).unwrap();
        let url = consent_url(&s, &scopes(), "http://127.0.0.1:5555/", "st4te").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "123.apps.googleusercontent.com");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:5555/");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], "st4te");
        assert!(pairs["scope"].contains("drive.readonly"));
    }

    #[test]
    fn parse_redirect_variants() {
        assert_eq!(
            parse_redirect("/?state=abc&code=4%2F0Ax&scope=x"),
            Redirect::Code {
                code: "4/0Ax".into(),
                state: "abc".into()
            }
        );
        assert_eq!(
            parse_redirect("/?error=access_denied&state=abc"),
            Redirect::Denied("access_denied".into())
        );
        assert_eq!(parse_redirect("/favicon.ico"), Redirect::Ignored);
    }

    #[tokio::test]
    async fn pre_issued_token_skips_everything() {
        let config = FetchConfig::builder()
            .spreadsheet_id("s")
            .credentials_path("/nonexistent/creds.json")
            .access_token("preset")
            .build()
            .unwrap();
        assert_eq!(authenticate(&config).await.unwrap(), "preset");
    }

    #[tokio::test]
    async fn fresh_cache_is_used_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        let cache = TokenCache {
            access_token: "cached".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(unix_now() + 3600),
            scopes: scopes(),
        };
        cache.save(&token_path).await.unwrap();
        assert_eq!(TokenCache::load(&token_path), Some(cache));

        let config = FetchConfig::builder()
            .spreadsheet_id("s")
            .credentials_path(dir.path().join("missing.json"))
            .token_path(&token_path)
            .build()
            .unwrap();
        assert_eq!(authenticate(&config).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn stale_cache_without_secrets_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, r#"{"access_token":"old","expires_at":1}"#).unwrap();

        let config = FetchConfig::builder()
            .spreadsheet_id("s")
            .credentials_path(dir.path().join("missing.json"))
            .token_path(&token_path)
            .build()
            .unwrap();
        let err = authenticate(&config).await.unwrap_err();
        assert!(matches!(err, FetchError::CredentialsNotFound { .. }));
    }
}
