//! Eager (whole-sheet) entry points.
//!
//! [`fetch_sheet`] walks every data row, one at a time, and returns only when
//! the last row has been attempted. Use [`crate::stream::fetch_stream`] to
//! observe rows as they finish, or [`plan_sheet`] to see what a run would
//! write without downloading anything.

use crate::config::FetchConfig;
use crate::error::{FetchError, RowError};
use crate::output::{RowPlan, RowReport, RowStatus, RunOutput, RunStats, SkipReason};
use crate::pipeline::google::GoogleClient;
use crate::pipeline::save::{self, FileKind};
use crate::pipeline::{auth, engine, naming, url};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// An authenticated run over one sheet.
pub(crate) struct Session {
    config: FetchConfig,
    client: GoogleClient,
    engine_ready: OnceCell<bool>,
}

impl Session {
    pub(crate) async fn connect(config: &FetchConfig) -> Result<Self, FetchError> {
        let token = auth::authenticate(config).await?;
        let client = GoogleClient::new(token, config)?;
        Ok(Self {
            config: config.clone(),
            client,
            engine_ready: OnceCell::new(),
        })
    }

    pub(crate) fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Every row of the configured sheet, header included.
    pub(crate) async fn read_rows(&self) -> Result<Vec<Vec<String>>, FetchError> {
        let id = &self.config.spreadsheet_id;
        let range = &self.config.sheet_name;
        let rows = self
            .client
            .sheet_values(id, range)
            .await
            .map_err(|e| FetchError::SheetReadFailed {
                spreadsheet_id: id.clone(),
                range: range.clone(),
                reason: e.to_string(),
            })?;
        info!("Found {} rows in sheet '{}'", rows.len(), range);
        Ok(rows)
    }

    /// Fetch and save one data row. Never fails; problems land in the report.
    pub(crate) async fn process_row(&self, row_num: usize, row: &[String]) -> RowReport {
        let start = Instant::now();
        let cb = self.config.progress_callback.as_ref();

        let url = match url_cell(row, self.config.url_column) {
            Some(u) => u.to_string(),
            None => {
                info!("Row {}: No URL found", row_num);
                if let Some(cb) = cb {
                    cb.on_row_skipped(row_num, &SkipReason::NoUrl.to_string());
                }
                return RowReport::skipped(row_num, None, SkipReason::NoUrl);
            }
        };

        let Some(file_id) = url::extract_file_id(&url) else {
            let reason = SkipReason::InvalidUrl { url: url.clone() };
            warn!("Row {}: {}", row_num, reason);
            if let Some(cb) = cb {
                cb.on_row_skipped(row_num, &reason.to_string());
            }
            return RowReport::skipped(row_num, Some(url), reason);
        };

        info!("Row {}: Processing {}", row_num, file_id);
        if let Some(cb) = cb {
            cb.on_row_start(row_num, &file_id);
        }

        let (filename, bytes, status) = self.fetch_file(row_num, row, &file_id).await;

        match &status {
            RowStatus::Saved(artifact) => {
                let name = filename.as_deref().unwrap_or_default();
                info!("Row {}: Successfully processed {}", row_num, name);
                if let Some(cb) = cb {
                    cb.on_row_complete(row_num, name, artifact.file_count());
                }
            }
            RowStatus::Failed(e) => {
                warn!("{}", e);
                if let Some(cb) = cb {
                    cb.on_row_error(row_num, &e.to_string());
                }
            }
            RowStatus::Skipped(_) => {}
        }

        RowReport {
            row: row_num,
            url: Some(url),
            file_id: Some(file_id),
            filename,
            status,
            bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// metadata → filename → download → save.
    async fn fetch_file(
        &self,
        row_num: usize,
        row: &[String],
        file_id: &str,
    ) -> (Option<String>, u64, RowStatus) {
        let meta = match self.client.file_metadata(file_id).await {
            Ok(m) => m,
            Err(e) => {
                let err = RowError::MetadataFailed {
                    row: row_num,
                    file_id: file_id.to_string(),
                    detail: e.to_string(),
                };
                return (None, 0, RowStatus::Failed(err));
            }
        };
        debug!(
            "Row {}: '{}' ({}, {:?} bytes)",
            row_num, meta.name, meta.mime_type, meta.size
        );

        let filename = naming::safe_filename(row, self.config.name_column, &meta.name);
        if FileKind::classify(&filename) == FileKind::Pdf {
            self.ensure_engine().await;
        }

        let cb = self.config.progress_callback.as_ref();
        let downloaded = self
            .client
            .download(file_id, meta.size, |done, total| {
                if let Some(cb) = cb {
                    cb.on_download_progress(row_num, done, total);
                }
            })
            .await;
        let bytes = match downloaded {
            Ok(b) => b,
            Err(e) => {
                let err = RowError::DownloadFailed {
                    row: row_num,
                    file_id: file_id.to_string(),
                    retries: if e.is_transient() { self.config.max_retries } else { 0 },
                    detail: e.to_string(),
                };
                return (Some(filename), 0, RowStatus::Failed(err));
            }
        };
        let size = bytes.len() as u64;

        let options = self.config.save_options();
        let saved = save::save_file(&bytes, &filename, &self.config.download_dir, &options).await;
        let status = match saved {
            Ok(artifact) => RowStatus::Saved(artifact),
            Err(e) => RowStatus::Failed(RowError::SaveFailed {
                row: row_num,
                detail: e.source.to_string(),
                path: e.path,
            }),
        };
        (Some(filename), size, status)
    }

    /// Make pdfium available before the first PDF is rendered. A failure is
    /// reported once; PDFs then take the image/raw fallbacks.
    async fn ensure_engine(&self) {
        self.engine_ready
            .get_or_init(|| async {
                let cb = self.config.progress_callback.as_ref();
                let on_progress = |done: u64, total: Option<u64>| {
                    if let Some(cb) = cb {
                        cb.on_engine_download(done, total);
                    }
                };
                match engine::ensure_engine(Some(&on_progress)).await {
                    Ok(path) => {
                        debug!("pdfium ready at {}", path.display());
                        true
                    }
                    Err(e) => {
                        warn!("{e}");
                        if let Some(cb) = cb {
                            cb.on_engine_unavailable(&e.to_string());
                        }
                        false
                    }
                }
            })
            .await;
    }

    #[cfg(test)]
    fn engine_attempted(&self) -> bool {
        self.engine_ready.initialized()
    }

    /// Resolve one row's target filename without downloading.
    pub(crate) async fn plan_row(&self, row_num: usize, row: &[String]) -> Option<RowPlan> {
        let url = url_cell(row, self.config.url_column)?.to_string();
        let mut plan = RowPlan {
            row: row_num,
            url: url.clone(),
            file_id: None,
            original_name: None,
            filename: None,
            error: None,
        };

        let Some(file_id) = url::extract_file_id(&url) else {
            plan.error = Some(SkipReason::InvalidUrl { url }.to_string());
            return Some(plan);
        };

        match self.client.file_metadata(&file_id).await {
            Ok(meta) => {
                plan.filename = Some(naming::safe_filename(
                    row,
                    self.config.name_column,
                    &meta.name,
                ));
                plan.original_name = Some(meta.name);
            }
            Err(e) => plan.error = Some(e.to_string()),
        }
        plan.file_id = Some(file_id);
        Some(plan)
    }
}

/// The trimmed URL cell, if non-empty.
fn url_cell(row: &[String], url_column: usize) -> Option<&str> {
    row.get(url_column).map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Data rows (header excluded) whose URL cell is non-empty.
pub fn count_url_rows(data_rows: &[Vec<String>], url_column: usize) -> usize {
    data_rows
        .iter()
        .filter(|r| url_cell(r, url_column).is_some())
        .count()
}

/// Sheet row number of the first data row (row 1 is the header).
pub(crate) const FIRST_DATA_ROW: usize = 2;

/// Rows after the header.
pub(crate) fn data_rows(mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    if rows.is_empty() {
        return rows;
    }
    rows.remove(0);
    rows
}

pub(crate) async fn prepare_output_dir(config: &FetchConfig) -> Result<(), FetchError> {
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|e| FetchError::OutputDirFailed {
            path: config.download_dir.clone(),
            source: e,
        })
}

/// Download and save every file linked from the sheet.
///
/// # Returns
/// `Ok(RunOutput)` once every row has been attempted, even if some rows
/// failed (check `output.stats.failed`).
///
/// # Errors
/// Only for fatal problems: unusable credentials, an unreadable sheet, or an
/// output directory that cannot be created.
pub async fn fetch_sheet(config: &FetchConfig) -> Result<RunOutput, FetchError> {
    let total_start = Instant::now();
    prepare_output_dir(config).await?;

    let session = Session::connect(config).await?;
    let rows = data_rows(session.read_rows().await?);

    let total_rows = rows.len();
    let url_rows = count_url_rows(&rows, config.url_column);
    info!("Found {} rows with URLs", url_rows);

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total_rows, url_rows);
    }

    let mut reports = Vec::with_capacity(total_rows);
    for (i, row) in rows.iter().enumerate() {
        reports.push(session.process_row(FIRST_DATA_ROW + i, row).await);
    }

    let mut stats = RunStats::from_reports(&reports, total_rows, url_rows);
    stats.duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Run complete: {} saved, {} skipped, {} failed in {}ms",
        stats.saved, stats.skipped, stats.failed, stats.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(stats.saved, stats.skipped, stats.failed);
    }

    Ok(RunOutput {
        rows: reports,
        stats,
    })
}

/// Synchronous wrapper around [`fetch_sheet`].
///
/// Creates a temporary tokio runtime internally.
pub fn fetch_sheet_sync(config: &FetchConfig) -> Result<RunOutput, FetchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FetchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(fetch_sheet(config))
}

/// List what a run would write, looking up metadata but downloading nothing.
///
/// Rows without a URL are omitted.
pub async fn plan_sheet(config: &FetchConfig) -> Result<Vec<RowPlan>, FetchError> {
    let session = Session::connect(config).await?;
    let rows = data_rows(session.read_rows().await?);

    let mut plans = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if let Some(plan) = session.plan_row(FIRST_DATA_ROW + i, row).await {
            plans.push(plan);
        }
    }
    Ok(plans)
}
