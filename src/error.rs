//! Error types for the edgequake-sheetfetch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FetchError`] — **Fatal**: the run cannot proceed at all (missing
//!   credentials, consent refused, sheet unreadable, output directory not
//!   writable). Returned as `Err(FetchError)` from the top-level `fetch*`
//!   functions.
//!
//! * [`RowError`] — **Non-fatal**: a single row failed (file deleted on the
//!   Drive side, transient network error, disk full) but every other row is
//!   still attempted. Stored inside [`crate::output::RowStatus::Failed`] so
//!   callers can inspect partial success after the run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-sheetfetch library.
///
/// Row-level failures use [`RowError`] and are stored in
/// [`crate::output::RowReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum FetchError {
    // ── Credential errors ─────────────────────────────────────────────────
    /// The OAuth client secrets file does not exist.
    #[error("OAuth client secrets not found: '{path}'\nDownload them from the Google Cloud console (OAuth client ID → Desktop app).")]
    CredentialsNotFound { path: PathBuf },

    /// The client secrets file exists but is not in Google's JSON shape.
    #[error("Invalid OAuth client secrets in '{path}': {detail}")]
    InvalidCredentials { path: PathBuf, detail: String },

    /// Token exchange, refresh, or the consent flow failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The user did not complete the consent flow in time.
    #[error("Timed out after {secs}s waiting for the OAuth consent redirect")]
    AuthTimeout { secs: u64 },

    /// Could not persist the refreshed token.
    #[error("Failed to write token cache '{path}': {source}")]
    TokenCacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Sheet errors ──────────────────────────────────────────────────────
    /// The Sheets API call failed.
    #[error("Failed to read sheet '{range}' of spreadsheet '{spreadsheet_id}': {reason}")]
    SheetReadFailed {
        spreadsheet_id: String,
        range: String,
        reason: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the download directory.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not locate, download, or bind a pdfium library.
    #[error(
        "Failed to prepare pdfium library: {0}\n\n\
PDFium is normally downloaded automatically for the first PDF row.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumUnavailable(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single sheet row.
///
/// The run continues with the next row after logging it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RowError {
    /// Drive `files.get` metadata call failed.
    #[error("Row {row}: metadata lookup for '{file_id}' failed: {detail}")]
    MetadataFailed {
        row: usize,
        file_id: String,
        detail: String,
    },

    /// Content download failed after retries.
    #[error("Row {row}: download of '{file_id}' failed after {retries} retries: {detail}")]
    DownloadFailed {
        row: usize,
        file_id: String,
        retries: u32,
        detail: String,
    },

    /// Every save strategy failed, including the raw byte write.
    #[error("Row {row}: could not save '{path}': {detail}")]
    SaveFailed {
        row: usize,
        path: PathBuf,
        detail: String,
    },
}

impl RowError {
    /// The 1-based sheet row this error belongs to.
    pub fn row(&self) -> usize {
        match self {
            RowError::MetadataFailed { row, .. }
            | RowError::DownloadFailed { row, .. }
            | RowError::SaveFailed { row, .. } => *row,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_not_found_display() {
        let e = FetchError::CredentialsNotFound {
            path: PathBuf::from("/tmp/missing.json"),
        };
        assert!(e.to_string().contains("/tmp/missing.json"));
    }

    #[test]
    fn sheet_read_failed_display() {
        let e = FetchError::SheetReadFailed {
            spreadsheet_id: "abc".into(),
            range: "Estimates/Invoices".into(),
            reason: "HTTP 403".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Estimates/Invoices"), "got: {msg}");
        assert!(msg.contains("HTTP 403"));
    }

    #[test]
    fn row_error_display_and_row() {
        let e = RowError::DownloadFailed {
            row: 7,
            file_id: "xyz".into(),
            retries: 2,
            detail: "HTTP 500".into(),
        };
        assert!(e.to_string().starts_with("Row 7"));
        assert_eq!(e.row(), 7);
    }

    #[test]
    fn row_error_serialises() {
        let e = RowError::SaveFailed {
            row: 3,
            path: PathBuf::from("out/INV-1.pdf"),
            detail: "disk full".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("SaveFailed"));
        assert!(json.contains("disk full"));
    }
}
