//! Streaming API: emit row reports as each row finishes.
//!
//! [`crate::fetch::fetch_sheet`] returns only after the whole sheet is done.
//! [`fetch_stream`] does the fatal setup (output directory, auth, sheet read)
//! eagerly, then yields one [`RowReport`] per data row in sheet order. Rows are
//! still processed one at a time; nothing runs until the stream is polled.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::fetch::{self, Session, FIRST_DATA_ROW};
use crate::output::{RowReport, RowStatus};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of row reports.
pub type RowStream = Pin<Box<dyn Stream<Item = RowReport> + Send>>;

#[derive(Default)]
struct Tally {
    saved: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record(&self, report: &RowReport) {
        let counter = match report.status {
            RowStatus::Saved(_) => &self.saved,
            RowStatus::Skipped(_) => &self.skipped,
            RowStatus::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fetch every linked file, yielding each row's report as it completes.
///
/// `on_run_complete` fires once the last report has been yielded.
///
/// # Errors
/// The same fatal errors as [`crate::fetch::fetch_sheet`], raised before the
/// stream is returned.
///
/// # Example
/// ```rust,no_run
/// use edgequake_sheetfetch::{fetch_stream, FetchConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = FetchConfig::builder().spreadsheet_id("1gdj...").build()?;
/// let mut rows = fetch_stream(&config).await?;
/// while let Some(report) = rows.next().await {
///     println!("row {}: saved={}", report.row, report.is_saved());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn fetch_stream(config: &FetchConfig) -> Result<RowStream, FetchError> {
    fetch::prepare_output_dir(config).await?;

    let session = Arc::new(Session::connect(config).await?);
    let rows = fetch::data_rows(session.read_rows().await?);

    let url_rows = fetch::count_url_rows(&rows, config.url_column);
    info!("Found {} rows with URLs", url_rows);
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(rows.len(), url_rows);
    }

    let tally = Arc::new(Tally::default());

    let row_tally = Arc::clone(&tally);
    let row_session = Arc::clone(&session);
    let reports = stream::iter(rows.into_iter().enumerate()).then(move |(i, row)| {
        let session = Arc::clone(&row_session);
        let tally = Arc::clone(&row_tally);
        async move {
            let report = session.process_row(FIRST_DATA_ROW + i, &row).await;
            tally.record(&report);
            report
        }
    });

    let finish = stream::once(async move {
        let saved = tally.saved.load(Ordering::Relaxed);
        let skipped = tally.skipped.load(Ordering::Relaxed);
        let failed = tally.failed.load(Ordering::Relaxed);
        info!(
            "Run complete: {} saved, {} skipped, {} failed",
            saved, skipped, failed
        );
        if let Some(ref cb) = session.config().progress_callback {
            cb.on_run_complete(saved, skipped, failed);
        }
        None
    })
    .filter_map(|r: Option<RowReport>| async move { r });

    Ok(Box::pin(reports.chain(finish)))
}
