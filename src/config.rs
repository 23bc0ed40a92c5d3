//! Configuration types for a sheet-driven fetch run.
//!
//! All run behaviour is controlled through [`FetchConfig`], built via its
//! [`FetchConfigBuilder`]. Every knob lives in one struct so a run can be
//! logged, diffed against another run, or rebuilt from CLI flags and
//! environment variables in a single place.

use crate::error::FetchError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Read-only Drive access. The Sheets API accepts it for reading values too.
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/drive.readonly"];

/// Public Sheets v4 endpoint.
pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Public Drive v3 endpoint.
pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

/// Configuration for one fetch run.
///
/// Built via [`FetchConfig::builder()`] or using [`FetchConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_sheetfetch::FetchConfig;
///
/// let config = FetchConfig::builder()
///     .spreadsheet_id("1gdjS8gaGFaQs6J09yv7SeiYKy6ZdOLnXoZfIrQQpGoY")
///     .sheet_name("Estimates/Invoices")
///     .url_column(7)
///     .dpi(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.name_column, 1);
/// ```
#[derive(Clone)]
pub struct FetchConfig {
    /// Google Sheets spreadsheet id (the long token in the sheet URL).
    pub spreadsheet_id: String,

    /// Sheet name, used verbatim as the A1 range. Default: `Sheet1`.
    pub sheet_name: String,

    /// 0-based column holding the Drive URL. Default: 7 (column H).
    pub url_column: usize,

    /// 0-based column whose value becomes the file stem. Default: 1 (column B).
    pub name_column: usize,

    /// OAuth client secrets JSON ("Desktop app" client). Default: `credentials.json`.
    pub credentials_path: PathBuf,

    /// Cached OAuth token. Default: `token.json`.
    pub token_path: PathBuf,

    /// Pre-issued bearer token. When set, the OAuth flow is skipped entirely.
    pub access_token: Option<String>,

    /// Scopes requested during consent. Default: [`DEFAULT_SCOPES`].
    pub scopes: Vec<String>,

    /// Directory every artifact is written into. Default: `downloaded_files`.
    pub download_dir: PathBuf,

    /// Rasterisation DPI for PDF pages. Range: 72–600. Default: 300.
    ///
    /// PDF user space is 72 units per inch, so pages are scaled by `dpi / 72`.
    pub dpi: u32,

    /// JPEG quality used whenever a JPEG is written. Range: 1–100. Default: 95.
    pub quality: u8,

    /// Encoding for rasterised PDF pages. Default: [`PageImageFormat::Png`].
    pub page_format: PageImageFormat,

    /// Hard cap on either edge of a rendered page, in pixels. Default: 10 000.
    ///
    /// Keeps an A0 drawing at 300 DPI from allocating gigabytes.
    pub max_rendered_pixels: u32,

    /// Retries for transient HTTP failures (timeouts, 429, 5xx). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub http_timeout_secs: u64,

    /// How long to wait for the browser consent redirect. Default: 300.
    pub auth_timeout_secs: u64,

    /// Sheets API base URL. Override only for proxies and tests.
    pub sheets_base_url: String,

    /// Drive API base URL. Override only for proxies and tests.
    pub drive_base_url: String,

    /// Optional per-row progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: "Sheet1".to_string(),
            url_column: 7,
            name_column: 1,
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
            access_token: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            download_dir: PathBuf::from("downloaded_files"),
            dpi: 300,
            quality: 95,
            page_format: PageImageFormat::default(),
            max_rendered_pixels: 10_000,
            max_retries: 2,
            retry_backoff_ms: 500,
            http_timeout_secs: 120,
            auth_timeout_secs: 300,
            sheets_base_url: SHEETS_BASE_URL.to_string(),
            drive_base_url: DRIVE_BASE_URL.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_name", &self.sheet_name)
            .field("url_column", &self.url_column)
            .field("name_column", &self.name_column)
            .field("credentials_path", &self.credentials_path)
            .field("token_path", &self.token_path)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("download_dir", &self.download_dir)
            .field("dpi", &self.dpi)
            .field("quality", &self.quality)
            .field("page_format", &self.page_format)
            .field("max_retries", &self.max_retries)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn FetchProgressCallback>"),
            )
            .finish()
    }
}

impl FetchConfig {
    /// Create a new builder for `FetchConfig`.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Options consumed by [`crate::pipeline::save::save_file`].
    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            dpi: self.dpi,
            quality: self.quality,
            page_format: self.page_format,
            max_rendered_pixels: self.max_rendered_pixels,
        }
    }
}

/// Builder for [`FetchConfig`].
#[derive(Debug)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn spreadsheet_id(mut self, id: impl Into<String>) -> Self {
        self.config.spreadsheet_id = id.into();
        self
    }

    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.sheet_name = name.into();
        self
    }

    pub fn url_column(mut self, col: usize) -> Self {
        self.config.url_column = col;
        self
    }

    pub fn name_column(mut self, col: usize) -> Self {
        self.config.name_column = col;
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = path.into();
        self
    }

    pub fn token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.token_path = path.into();
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.config.scopes = scopes;
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.config.quality = quality.clamp(1, 100);
        self
    }

    pub fn page_format(mut self, format: PageImageFormat) -> Self {
        self.config.page_format = format;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn auth_timeout_secs(mut self, secs: u64) -> Self {
        self.config.auth_timeout_secs = secs;
        self
    }

    pub fn sheets_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.sheets_base_url = url.into();
        self
    }

    pub fn drive_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.drive_base_url = url.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FetchConfig, FetchError> {
        let c = &self.config;
        if c.spreadsheet_id.trim().is_empty() {
            return Err(FetchError::InvalidConfig(
                "spreadsheet id must not be empty".into(),
            ));
        }
        if c.sheet_name.trim().is_empty() {
            return Err(FetchError::InvalidConfig("sheet name must not be empty".into()));
        }
        if c.dpi < 72 || c.dpi > 600 {
            return Err(FetchError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.quality == 0 || c.quality > 100 {
            return Err(FetchError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.quality
            )));
        }
        if c.url_column == c.name_column {
            return Err(FetchError::InvalidConfig(format!(
                "URL column and name column are both {}",
                column_letter(c.url_column)
            )));
        }
        if c.http_timeout_secs == 0 {
            return Err(FetchError::InvalidConfig("HTTP timeout must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

/// The subset of [`FetchConfig`] that drives save/convert decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub dpi: u32,
    pub quality: u8,
    pub page_format: PageImageFormat,
    pub max_rendered_pixels: u32,
}

impl Default for SaveOptions {
    fn default() -> Self {
        FetchConfig::default().save_options()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding used for each rasterised PDF page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageImageFormat {
    /// Lossless, `{stem}_page_{n}.png`. (default)
    #[default]
    Png,
    /// Lossy at the configured quality, `{stem}_page_{n}.jpg`.
    Jpeg,
}

impl PageImageFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            PageImageFormat::Png => "png",
            PageImageFormat::Jpeg => "jpg",
        }
    }
}

// ── Column helpers ───────────────────────────────────────────────────────

/// Parse a spreadsheet column reference into a 0-based index.
///
/// Accepts letters (`"B"`, `"h"`, `"AA"`) or a plain 0-based number (`"7"`).
pub fn parse_column(s: &str) -> Option<usize> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<usize>() {
        return Some(n);
    }
    if !s.chars().all(|c| c.is_ascii_alphabetic()) || s.len() > 3 {
        return None;
    }
    let mut acc = 0usize;
    for c in s.chars() {
        let v = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        acc = acc * 26 + v;
    }
    Some(acc - 1)
}

/// Render a 0-based column index as spreadsheet letters (`7` → `"H"`).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FetchConfigBuilder {
        FetchConfig::builder().spreadsheet_id("sheet-id")
    }

    #[test]
    fn defaults_match_invoice_sheet_layout() {
        let c = FetchConfig::default();
        assert_eq!(c.url_column, 7);
        assert_eq!(c.name_column, 1);
        assert_eq!(c.dpi, 300);
        assert_eq!(c.quality, 95);
        assert_eq!(c.page_format, PageImageFormat::Png);
        assert_eq!(c.token_path, PathBuf::from("token.json"));
    }

    #[test]
    fn builder_clamps_dpi_and_quality() {
        let c = base().dpi(10).quality(0).build().unwrap();
        assert_eq!(c.dpi, 72);
        assert_eq!(c.quality, 1);

        let c = base().dpi(5000).quality(200).build().unwrap();
        assert_eq!(c.dpi, 600);
        assert_eq!(c.quality, 100);
    }

    #[test]
    fn build_rejects_empty_spreadsheet_id() {
        let err = FetchConfig::builder().build().unwrap_err();
        assert!(matches!(err, FetchError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_same_columns() {
        let err = base().url_column(1).name_column(1).build().unwrap_err();
        assert!(err.to_string().contains("both B"), "got: {err}");
    }

    #[test]
    fn debug_redacts_token() {
        let c = base().access_token("ya29.secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("ya29.secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn parse_column_letters_and_numbers() {
        assert_eq!(parse_column("A"), Some(0));
        assert_eq!(parse_column("b"), Some(1));
        assert_eq!(parse_column("H"), Some(7));
        assert_eq!(parse_column("Z"), Some(25));
        assert_eq!(parse_column("AA"), Some(26));
        assert_eq!(parse_column("7"), Some(7));
        assert_eq!(parse_column(""), None);
        assert_eq!(parse_column("H1"), None);
    }

    #[test]
    fn column_letter_round_trips_common_columns() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(7), "H");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
    }

    #[test]
    fn page_format_extension() {
        assert_eq!(PageImageFormat::Png.extension(), "png");
        assert_eq!(PageImageFormat::Jpeg.extension(), "jpg");
    }
}
