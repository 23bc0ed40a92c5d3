//! Progress-callback trait for per-row fetch events.
//!
//! Inject an [`Arc<dyn FetchProgressCallback>`] via
//! [`crate::config::FetchConfigBuilder::progress_callback`] to receive
//! events as the run walks the sheet. The library knows nothing about how the
//! host application reports progress; the CLI renders an `indicatif` bar, a
//! service might forward to a channel.
//!
//! # Example
//!
//! ```rust
//! use edgequake_sheetfetch::{FetchConfig, FetchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     saved: AtomicUsize,
//! }
//!
//! impl FetchProgressCallback for CountingCallback {
//!     fn on_row_complete(&self, row: usize, filename: &str, files_written: usize) {
//!         self.saved.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("row {row}: {filename} ({files_written} files)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { saved: AtomicUsize::new(0) });
//!
//! let config = FetchConfig::builder()
//!     .spreadsheet_id("sheet")
//!     .progress_callback(counter as Arc<dyn FetchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the fetch pipeline as it processes each row.
///
/// Every method except [`on_consent_required`](Self::on_consent_required)
/// defaults to a no-op, so callers only override what they care about. Rows are processed one at a time, but implementations
/// must still be `Send + Sync` because the config is shared across tasks.
pub trait FetchProgressCallback: Send + Sync {
    /// Called when the OAuth flow needs the operator to open `url` in a browser.
    ///
    /// Unlike the other methods this does not default to a no-op: it prints
    /// [`consent_prompt`] to stderr so a headless run is never stuck waiting
    /// on a prompt nobody can see.
    fn on_consent_required(&self, url: &str) {
        eprintln!("{}", consent_prompt(url));
    }

    /// Called once after the sheet has been read.
    ///
    /// # Arguments
    /// * `data_rows` — rows after the header
    /// * `url_rows`  — data rows with a non-empty URL cell
    fn on_run_start(&self, data_rows: usize, url_rows: usize) {
        let _ = (data_rows, url_rows);
    }

    /// Called before the metadata lookup for a row with an extractable id.
    fn on_row_start(&self, row: usize, file_id: &str) {
        let _ = (row, file_id);
    }

    /// Called per chunk while the pdfium library is downloaded, which happens
    /// at most once per run and only when the first PDF row is reached.
    fn on_engine_download(&self, downloaded: u64, total: Option<u64>) {
        let _ = (downloaded, total);
    }

    /// Called when pdfium could not be made available. PDFs are then saved
    /// through the image/raw fallbacks.
    fn on_engine_unavailable(&self, error: &str) {
        let _ = error;
    }

    /// Called once per received body chunk.
    ///
    /// `total` is `None` when neither the server nor Drive metadata reported a size.
    fn on_download_progress(&self, row: usize, downloaded: u64, total: Option<u64>) {
        let _ = (row, downloaded, total);
    }

    /// Called when a row produced at least one file on disk.
    fn on_row_complete(&self, row: usize, filename: &str, files_written: usize) {
        let _ = (row, filename, files_written);
    }

    /// Called when a row has no URL or an unrecognised one.
    fn on_row_skipped(&self, row: usize, reason: &str) {
        let _ = (row, reason);
    }

    /// Called when a row failed; the run continues.
    fn on_row_error(&self, row: usize, error: &str) {
        let _ = (row, error);
    }

    /// Called once after every row has been attempted.
    fn on_run_complete(&self, saved: usize, skipped: usize, failed: usize) {
        let _ = (saved, skipped, failed);
    }
}

/// The text shown when browser consent is needed.
pub fn consent_prompt(url: &str) -> String {
    format!("Open this URL in your browser to authorise access:\n\n    {url}\n")
}

/// A no-op implementation for callers that don't need progress events.
///
/// Silent for every event, the consent URL included.
pub struct NoopProgressCallback;

impl FetchProgressCallback for NoopProgressCallback {
    fn on_consent_required(&self, _url: &str) {}
}

/// Convenience alias matching the type stored in [`crate::config::FetchConfig`].
pub type ProgressCallback = Arc<dyn FetchProgressCallback>;
