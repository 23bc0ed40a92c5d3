//! CLI binary for edgequake-sheetfetch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `FetchConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_sheetfetch::config::{column_letter, parse_column};
use edgequake_sheetfetch::{
    fetch_sheet, plan_sheet, FetchConfig, FetchProgressCallback, PageImageFormat,
    ProgressCallback, RowPlan,
};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the sheet's data rows plus a log
/// line per finished row.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports how many rows there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Authorising and reading sheet…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} rows  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Fetching");
        self.bar.set_message("");
        self.bar.reset_eta();
    }

    fn elapsed(&self, row: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .map(|mut m| m.remove(&row))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl FetchProgressCallback for CliProgressCallback {
    fn on_consent_required(&self, url: &str) {
        self.bar.suspend(|| {
            eprintln!(
                "{} {}\n\n    {}\n",
                cyan("◆"),
                bold("Open this URL in your browser to authorise access:"),
                url
            );
        });
        self.bar.set_message("Waiting for browser consent…");
    }

    fn on_run_start(&self, data_rows: usize, url_rows: usize) {
        self.activate_bar(data_rows);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{data_rows} rows, {url_rows} with URLs"))
        ));
    }

    fn on_row_start(&self, row: usize, file_id: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(row, Instant::now());
        }
        self.bar.set_message(format!("row {row}: {}", truncate(file_id, 24)));
    }

    fn on_engine_download(&self, downloaded: u64, total: Option<u64>) {
        let msg = match total {
            Some(t) => format!("PDF engine: {} / {}", HumanBytes(downloaded), HumanBytes(t)),
            None => format!("PDF engine: {}", HumanBytes(downloaded)),
        };
        self.bar.set_message(msg);
    }

    fn on_engine_unavailable(&self, error: &str) {
        self.bar.println(format!(
            "{} {}\n  {}",
            yellow("⚠"),
            bold("PDF engine unavailable; PDFs will be saved without rasterisation."),
            dim(&error.replace('\n', "\n  ")),
        ));
    }

    fn on_download_progress(&self, row: usize, downloaded: u64, total: Option<u64>) {
        let msg = match total {
            Some(t) => format!("row {row}: {} / {}", HumanBytes(downloaded), HumanBytes(t)),
            None => format!("row {row}: {}", HumanBytes(downloaded)),
        };
        self.bar.set_message(msg);
    }

    fn on_row_complete(&self, row: usize, filename: &str, files_written: usize) {
        let files = if files_written == 1 {
            "1 file".to_string()
        } else {
            format!("{files_written} files")
        };
        self.bar.println(format!(
            "  {} Row {:>4}  {:<32}  {:<8}  {}",
            green("✓"),
            row,
            truncate(filename, 32),
            dim(&files),
            self.elapsed(row),
        ));
        self.bar.inc(1);
    }

    fn on_row_skipped(&self, row: usize, reason: &str) {
        self.bar.println(format!(
            "  {} Row {:>4}  {}",
            dim("·"),
            row,
            dim(&truncate(reason, 72)),
        ));
        self.bar.inc(1);
    }

    fn on_row_error(&self, row: usize, error: &str) {
        self.bar.println(format!(
            "  {} Row {:>4}  {}  {}",
            red("✗"),
            row,
            red(&truncate(error, 80)),
            self.elapsed(row),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, saved: usize, skipped: usize, failed: usize) {
        self.bar.finish_and_clear();
        let mark = if failed == 0 {
            green("✔")
        } else if saved == 0 {
            red("✘")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{} {} saved  {} skipped  {} failed",
            mark,
            bold(&saved.to_string()),
            skipped,
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Fetch every file linked from column H of Sheet1
  sheetfetch 1gdjS8gaGFaQs6J09yv7SeiYKy6ZdOLnXoZfIrQQpGoY

  # A named sheet, links in column E, names from column A
  sheetfetch <ID> --sheet "Estimates/Invoices" --url-column E --name-column A

  # Lower-resolution JPEG pages into a custom directory
  sheetfetch <ID> --dpi 150 --page-format jpeg --quality 85 -o invoices/

  # Show what would be downloaded, as JSON
  sheetfetch <ID> --list-only --json

SAVE RULES:
  .pdf         every page → {name}_page_{n}.png (or .jpg with --page-format jpeg)
               not a PDF after all → decoded as an image → {name}.png
               neither → original bytes
  image types  decoded and re-encoded under the same extension
  other types  original bytes

AUTHENTICATION:
  1. Create an OAuth client ID of type "Desktop app" in the Google Cloud
     console and download it as credentials.json.
  2. The first run prints a consent URL; approve it in a browser. The token
     is cached in token.json and refreshed automatically afterwards.
  Set SHEETFETCH_ACCESS_TOKEN to use an already-issued bearer token instead.

ENVIRONMENT VARIABLES:
  SHEETFETCH_*                  Every flag, e.g. SHEETFETCH_DPI=150
  PDFIUM_LIB_PATH               Path to an existing libpdfium; skips auto-download
  SHEETFETCH_PDFIUM_CACHE_DIR   Override the pdfium cache directory
  RUST_LOG                      Override log filtering (e.g. RUST_LOG=debug)

  PDFium (~30 MB) is downloaded when the first PDF row is reached and cached in
  ~/.cache/sheetfetch/pdfium-7690/.
"#;

/// Download the files linked from a Google Sheet, named after their rows.
#[derive(Parser, Debug)]
#[command(
    name = "sheetfetch",
    version,
    about = "Download the files linked from a Google Sheet, named after their rows",
    long_about = "Read a Google Sheet, follow the Google Drive link in each row, and save \
the file under a name taken from the same row. PDFs are rasterised to one image per page, \
images are re-encoded, and anything else is stored as-is.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Spreadsheet id (the long token in the sheet's URL).
    spreadsheet_id: String,

    /// Sheet name, used as the A1 range.
    #[arg(long, env = "SHEETFETCH_SHEET", default_value = "Sheet1")]
    sheet: String,

    /// Column holding the Drive link (letter, or 0-based index).
    #[arg(long, env = "SHEETFETCH_URL_COLUMN", default_value = "H", value_parser = column_arg)]
    url_column: usize,

    /// Column whose value names the saved file (letter, or 0-based index).
    #[arg(long, env = "SHEETFETCH_NAME_COLUMN", default_value = "B", value_parser = column_arg)]
    name_column: usize,

    /// OAuth client secrets file.
    #[arg(long, env = "SHEETFETCH_CREDENTIALS", default_value = "credentials.json")]
    credentials: PathBuf,

    /// OAuth token cache file.
    #[arg(long, env = "SHEETFETCH_TOKEN", default_value = "token.json")]
    token: PathBuf,

    /// Pre-issued bearer token; skips the OAuth flow.
    #[arg(long, env = "SHEETFETCH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Directory the files are written to.
    #[arg(short, long, env = "SHEETFETCH_OUTPUT_DIR", default_value = "downloaded_files")]
    output_dir: PathBuf,

    /// PDF rasterisation DPI (72–600).
    #[arg(long, env = "SHEETFETCH_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// JPEG quality (1–100).
    #[arg(long, env = "SHEETFETCH_QUALITY", default_value_t = 95,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Image format for rasterised PDF pages.
    #[arg(long, env = "SHEETFETCH_PAGE_FORMAT", value_enum, default_value = "png")]
    page_format: PageFormatArg,

    /// Retries on transient HTTP failures (timeouts, 429, 5xx).
    #[arg(long, env = "SHEETFETCH_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP timeout in seconds.
    #[arg(long, env = "SHEETFETCH_TIMEOUT", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Print the planned filenames without downloading anything.
    #[arg(long, env = "SHEETFETCH_LIST_ONLY")]
    list_only: bool,

    /// Print structured JSON (RunOutput, or the plan with --list-only).
    #[arg(long, env = "SHEETFETCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHEETFETCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHEETFETCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHEETFETCH_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PageFormatArg {
    Png,
    Jpeg,
}

impl From<PageFormatArg> for PageImageFormat {
    fn from(v: PageFormatArg) -> Self {
        match v {
            PageFormatArg::Png => PageImageFormat::Png,
            PageFormatArg::Jpeg => PageImageFormat::Jpeg,
        }
    }
}

fn column_arg(s: &str) -> Result<usize, String> {
    parse_column(s).ok_or_else(|| format!("'{s}' is not a column letter (A, H, AA) or index"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level row logs when it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.list_only {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn FetchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── List-only mode ───────────────────────────────────────────────────
    if cli.list_only {
        let plans = plan_sheet(&config).await.context("Failed to list sheet")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plans).context("Failed to serialise plan")?
            );
        } else {
            print_plan(&plans, &config);
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let output = fetch_sheet(&config).await.context("Fetch failed")?;
    let stats = &output.stats;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        if !show_progress {
            eprintln!(
                "{} saved, {} skipped, {} failed",
                stats.saved, stats.skipped, stats.failed
            );
        }
        eprintln!(
            "   {} files  /  {}  —  {}ms total  →  {}",
            stats.files_written,
            dim(&HumanBytes(stats.bytes_downloaded).to_string()),
            stats.duration_ms,
            bold(&config.download_dir.display().to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `FetchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FetchConfig> {
    let mut builder = FetchConfig::builder()
        .spreadsheet_id(&cli.spreadsheet_id)
        .sheet_name(&cli.sheet)
        .url_column(cli.url_column)
        .name_column(cli.name_column)
        .credentials_path(&cli.credentials)
        .token_path(&cli.token)
        .download_dir(&cli.output_dir)
        .dpi(cli.dpi)
        .quality(cli.quality)
        .page_format(cli.page_format.clone().into())
        .max_retries(cli.max_retries)
        .http_timeout_secs(cli.timeout);

    if let Some(ref token) = cli.access_token {
        builder = builder.access_token(token);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_plan(plans: &[RowPlan], config: &FetchConfig) {
    println!(
        "{:>5}  {:<36}  {}",
        bold("Row"),
        bold(&format!("Column {}", column_letter(config.name_column))),
        bold("Source")
    );
    for p in plans {
        match (&p.filename, &p.error) {
            (Some(name), _) => println!(
                "{:>5}  {:<36}  {}",
                p.row,
                name,
                dim(p.original_name.as_deref().unwrap_or_default())
            ),
            (None, Some(err)) => println!("{:>5}  {:<36}  {}", p.row, red("—"), red(err)),
            (None, None) => println!("{:>5}  {:<36}", p.row, dim("?")),
        }
    }
    let ok = plans.iter().filter(|p| p.filename.is_some()).count();
    eprintln!(
        "{} {} of {} linked rows resolvable",
        if ok == plans.len() { green("✔") } else { yellow("⚠") },
        ok,
        plans.len()
    );
}
