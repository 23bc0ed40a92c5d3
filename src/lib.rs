//! # edgequake-sheetfetch
//!
//! Download every file a Google Sheet links to, name each one after its row,
//! and store it in a directly usable form.
//!
//! ## Why this crate?
//!
//! Invoice and receipt trackers often keep a Drive link per row. Pulling those
//! files by hand means opening each link, renaming the download after the
//! invoice number, and converting scanned PDFs to images for the next tool in
//! the chain. This crate does that in one pass: PDFs are rasterised page by
//! page, images are re-encoded under their own format, and anything else is
//! copied byte for byte.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Sheet
//!  │
//!  ├─ 1. Auth     cached token → refresh → browser consent (loopback)
//!  ├─ 2. Rows     Sheets v4 values.get, header skipped
//!  ├─ 3. Resolve  Drive link → file id → metadata → `{name column}{ext}`
//!  ├─ 4. Fetch    Drive v3 alt=media, streamed, retried on 429/5xx
//!  ├─ 5. Save     PDF → page images │ image → re-encode │ other → raw
//!  └─ 6. Report   per-row status + run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_sheetfetch::{fetch_sheet, FetchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FetchConfig::builder()
//!         .spreadsheet_id("1gdjS8gaGFaQs6J09yv7SeiYKy6ZdOLnXoZfIrQQpGoY")
//!         .sheet_name("Estimates/Invoices")
//!         .build()?;
//!     let output = fetch_sheet(&config).await?;
//!     eprintln!(
//!         "{} saved, {} skipped, {} failed",
//!         output.stats.saved, output.stats.skipped, output.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sheetfetch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-sheetfetch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FetchConfig, FetchConfigBuilder, PageImageFormat, SaveOptions};
pub use error::{FetchError, RowError};
pub use fetch::{fetch_sheet, fetch_sheet_sync, plan_sheet};
pub use output::{
    DriveFile, RawReason, RowPlan, RowReport, RowStatus, RunOutput, RunStats, SavedArtifact,
    SkipReason,
};
pub use progress::{FetchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{fetch_stream, RowStream};
