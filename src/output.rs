//! Result types produced by a fetch run.
//!
//! Everything here is `Serialize` so the CLI's `--json` mode can dump a
//! [`RunOutput`] verbatim and a downstream script can pick up exactly which
//! files each row produced.

use crate::error::RowError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Drive metadata for one file (`files.get?fields=name,mimeType,size`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Drive reports sizes as decimal strings; absent for native Google docs.
    #[serde(default, with = "size_string")]
    pub size: Option<u64>,
}

mod size_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_str(&n.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let raw: Option<serde_json::Value> = Option::deserialize(d)?;
        Ok(match raw {
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            _ => None,
        })
    }
}

/// Why a byte-for-byte copy was written instead of a converted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawReason {
    /// The extension is neither PDF nor a known image type.
    NotMedia,
    /// A `.pdf` file that could not be rasterised nor decoded as an image.
    PdfAndImageFailed,
    /// An image extension whose bytes could not be decoded or re-encoded.
    ImageDecodeFailed,
}

/// Which branch of the save chain produced output, and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SavedArtifact {
    /// Every page of a PDF rasterised to its own image.
    PdfPages { paths: Vec<PathBuf>, dpi: u32 },
    /// A `.pdf` that was really an image; written as `{stem}.png`.
    PdfAsImage { path: PathBuf },
    /// An image decoded and re-encoded under its own extension.
    Image { path: PathBuf },
    /// Bytes written unchanged.
    Raw { path: PathBuf, reason: RawReason },
}

impl SavedArtifact {
    /// All paths written for this artifact.
    pub fn paths(&self) -> Vec<&PathBuf> {
        match self {
            SavedArtifact::PdfPages { paths, .. } => paths.iter().collect(),
            SavedArtifact::PdfAsImage { path }
            | SavedArtifact::Image { path }
            | SavedArtifact::Raw { path, .. } => vec![path],
        }
    }

    /// Number of files written.
    pub fn file_count(&self) -> usize {
        match self {
            SavedArtifact::PdfPages { paths, .. } => paths.len(),
            _ => 1,
        }
    }
}

/// Why a row was not fetched at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The URL cell is missing or empty.
    NoUrl,
    /// The URL did not match any known Drive link shape.
    InvalidUrl { url: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoUrl => write!(f, "No URL found"),
            SkipReason::InvalidUrl { url } => write!(f, "Invalid URL format: {url}"),
        }
    }
}

/// Final state of one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RowStatus {
    Saved(SavedArtifact),
    Skipped(SkipReason),
    Failed(RowError),
}

/// Per-row result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowReport {
    /// 1-based spreadsheet row number (data starts at 2).
    pub row: usize,
    pub url: Option<String>,
    pub file_id: Option<String>,
    /// Target filename built from the name column.
    pub filename: Option<String>,
    pub status: RowStatus,
    /// Downloaded byte count (0 when nothing was downloaded).
    pub bytes: u64,
    pub duration_ms: u64,
}

impl RowReport {
    pub(crate) fn skipped(row: usize, url: Option<String>, reason: SkipReason) -> Self {
        Self {
            row,
            url,
            file_id: None,
            filename: None,
            status: RowStatus::Skipped(reason),
            bytes: 0,
            duration_ms: 0,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.status, RowStatus::Saved(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RowStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, RowStatus::Skipped(_))
    }
}

/// What a dry run would fetch for one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowPlan {
    pub row: usize,
    pub url: String,
    /// `None` when the URL is not a recognised Drive link.
    pub file_id: Option<String>,
    /// `None` when the metadata lookup failed.
    pub original_name: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Rows after the header.
    pub total_rows: usize,
    /// Data rows with a non-empty URL cell.
    pub url_rows: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub files_written: usize,
    pub duration_ms: u64,
}

impl RunStats {
    /// Fold the reports of a finished run into counters.
    pub fn from_reports(reports: &[RowReport], total_rows: usize, url_rows: usize) -> Self {
        let mut stats = RunStats {
            total_rows,
            url_rows,
            ..Default::default()
        };
        for r in reports {
            stats.bytes_downloaded += r.bytes;
            match &r.status {
                RowStatus::Saved(a) => {
                    stats.saved += 1;
                    stats.files_written += a.file_count();
                }
                RowStatus::Skipped(_) => stats.skipped += 1,
                RowStatus::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub rows: Vec<RowReport>,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_file_parses_string_size() {
        let json = r#"{"name":"scan.pdf","mimeType":"application/pdf","size":"2048"}"#;
        let f: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(f.name, "scan.pdf");
        assert_eq!(f.mime_type, "application/pdf");
        assert_eq!(f.size, Some(2048));
    }

    #[test]
    fn drive_file_without_size() {
        let json = r#"{"name":"Doc","mimeType":"application/vnd.google-apps.document"}"#;
        let f: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(f.size, None);
    }

    #[test]
    fn stats_fold_reports() {
        let reports = vec![
            RowReport {
                row: 2,
                url: Some("u".into()),
                file_id: Some("a".into()),
                filename: Some("A.pdf".into()),
                status: RowStatus::Saved(SavedArtifact::PdfPages {
                    paths: vec!["A_page_1.png".into(), "A_page_2.png".into()],
                    dpi: 300,
                }),
                bytes: 100,
                duration_ms: 5,
            },
            RowReport::skipped(3, None, SkipReason::NoUrl),
            RowReport {
                row: 4,
                url: Some("u".into()),
                file_id: Some("b".into()),
                filename: None,
                status: RowStatus::Failed(RowError::MetadataFailed {
                    row: 4,
                    file_id: "b".into(),
                    detail: "HTTP 404".into(),
                }),
                bytes: 0,
                duration_ms: 1,
            },
        ];
        let stats = RunStats::from_reports(&reports, 3, 2);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.files_written, 2);
        assert_eq!(stats.bytes_downloaded, 100);
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(SkipReason::NoUrl.to_string(), "No URL found");
        let r = SkipReason::InvalidUrl {
            url: "https://example.com".into(),
        };
        assert!(r.to_string().contains("example.com"));
    }
}
