//! Thin HTTP client for the two Google APIs a run touches.
//!
//! * Sheets v4 `spreadsheets.values.get` — the rows.
//! * Drive v3 `files.get` — metadata, then content with `alt=media`.
//!
//! Transient failures (timeouts, connection resets, 429 and 5xx) are retried
//! up to `max_retries` times with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`, capped at [`MAX_BACKOFF_MS`]).
//! Anything else fails on the first try.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::output::DriveFile;
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Drive metadata fields requested per file.
const METADATA_FIELDS: &str = "id,name,mimeType,size";

/// A failed API call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response. `message` is Google's `error.message` when present.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// 2xx response whose body was not what the API documents.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Timeout(_) | ApiError::Transport(_) => true,
            ApiError::Decode(_) => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Authenticated client bound to one bearer token.
pub struct GoogleClient {
    http: reqwest::Client,
    token: String,
    sheets_base: Url,
    drive_base: Url,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl GoogleClient {
    pub fn new(token: impl Into<String>, config: &FetchConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!("edgequake-sheetfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Internal(format!("HTTP client: {e}")))?;

        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|e| FetchError::InvalidConfig(format!("bad API base URL '{raw}': {e}")))
        };

        Ok(Self {
            http,
            token: token.into(),
            sheets_base: parse(&config.sheets_base_url)?,
            drive_base: parse(&config.drive_base_url)?,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// All rows of `range` as display strings. Ragged rows are returned as-is.
    pub async fn sheet_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, ApiError> {
        let url = &values_url(&self.sheets_base, spreadsheet_id, range)?;
        let body: ValueRange = self
            .with_retries("values.get", || async move {
                let resp = self.get(url.clone()).await?;
                resp.json::<ValueRange>().await.map_err(ApiError::from_reqwest)
            })
            .await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    /// Name, MIME type and size of a Drive file.
    pub async fn file_metadata(&self, file_id: &str) -> Result<DriveFile, ApiError> {
        let mut url = file_url(&self.drive_base, file_id)?;
        url.query_pairs_mut()
            .append_pair("fields", METADATA_FIELDS)
            .append_pair("supportsAllDrives", "true");
        let url = &url;

        let mut file: DriveFile = self
            .with_retries("files.get", || async move {
                let resp = self.get(url.clone()).await?;
                resp.json::<DriveFile>().await.map_err(ApiError::from_reqwest)
            })
            .await?;
        if file.id.is_empty() {
            file.id = file_id.to_string();
        }
        Ok(file)
    }

    /// Download a file's content.
    ///
    /// `on_chunk(downloaded, total)` fires per received chunk; `total` comes
    /// from `Content-Length`, falling back to `size_hint`. A retried download
    /// starts again from zero.
    pub async fn download<F>(
        &self,
        file_id: &str,
        size_hint: Option<u64>,
        on_chunk: F,
    ) -> Result<Vec<u8>, ApiError>
    where
        F: Fn(u64, Option<u64>) + Sync,
    {
        let mut url = file_url(&self.drive_base, file_id)?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("supportsAllDrives", "true");
        let url = &url;
        let on_chunk = &on_chunk;

        self.with_retries("files.get?alt=media", || async move {
            let resp = self.get(url.clone()).await?;
            let total = resp.content_length().or(size_hint);
            let mut buf = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(ApiError::from_reqwest)?;
                buf.extend_from_slice(&chunk);
                on_chunk(buf.len() as u64, total);
            }
            Ok::<_, ApiError>(buf)
        })
        .await
    }

    /// Authenticated GET; non-2xx becomes [`ApiError::Status`].
    async fn get(&self, url: Url) -> Result<reqwest::Response, ApiError> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: google_error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        })
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = backoff_delay_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "{}: {} — retry {}/{} after {}ms",
                        what, e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Longest wait between two attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// `base_ms * 2^(attempt-1)`, saturating and capped at [`MAX_BACKOFF_MS`].
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// `{base}/spreadsheets/{id}/values/{range}`, with `range` encoded as a
/// single path segment so sheet names like `Estimates/Invoices` survive.
fn values_url(base: &Url, spreadsheet_id: &str, range: &str) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Transport(format!("base URL cannot take a path: {base}")))?
        .pop_if_empty()
        .extend(["spreadsheets", spreadsheet_id, "values", range]);
    Ok(url)
}

fn file_url(base: &Url, file_id: &str) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Transport(format!("base URL cannot take a path: {base}")))?
        .pop_if_empty()
        .extend(["files", file_id]);
    Ok(url)
}

fn cell_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull `error.message` out of a Google JSON error body.
fn google_error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    match &v["error"] {
        serde_json::Value::Object(o) => o.get("message")?.as_str().map(str::to_string),
        // OAuth endpoints answer {"error": "invalid_grant", "error_description": ...}
        serde_json::Value::String(s) => Some(
            v["error_description"]
                .as_str()
                .map(|d| format!("{s}: {d}"))
                .unwrap_or_else(|| s.clone()),
        ),
        _ => None,
    }
}
