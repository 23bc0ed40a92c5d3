//! Save/convert downloaded bytes according to the target filename.
//!
//! ## Fallback chain
//!
//! ```text
//! .pdf  ──▶ rasterise pages ──✗──▶ decode as image → {stem}.png ──✗──▶ raw bytes
//! image ──▶ decode + re-encode ───────────────────────────────────✗──▶ raw bytes
//! other ──────────────────────────────────────────────────────────────▶ raw bytes
//! ```
//!
//! Links in a sheet are frequently mislabelled: a phone photo uploaded as
//! `receipt.pdf`, a PDF saved with a `.jpg` name. Each step logs why it gave
//! up and hands the same bytes to the next, so every row ends with *some*
//! file on disk unless the disk write itself fails.
//!
//! All writes go through [`write_atomic`] (temp sibling + rename) so an
//! interrupted run never leaves a truncated artifact under its final name.

use crate::config::{PageImageFormat, SaveOptions};
use crate::output::{RawReason, SavedArtifact};
use crate::pipeline::render;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// The final raw write failed; nothing usable was produced.
#[derive(Debug, Error)]
#[error("failed to write '{path}': {source}")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// How a filename is handled, decided purely from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image(ImageFormat),
    Other,
}

impl FileKind {
    /// Classify by extension, case-insensitively.
    pub fn classify(filename: &str) -> FileKind {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => FileKind::Pdf,
            Some(e) => ImageFormat::from_extension(e)
                .map(FileKind::Image)
                .unwrap_or(FileKind::Other),
            None => FileKind::Other,
        }
    }
}

/// Persist `bytes` as `filename` under `dir`, converting by file kind.
pub async fn save_file(
    bytes: &[u8],
    filename: &str,
    dir: &Path,
    options: &SaveOptions,
) -> Result<SavedArtifact, WriteError> {
    let target = dir.join(filename);
    match FileKind::classify(filename) {
        FileKind::Pdf => save_pdf(bytes, &target, options).await,
        FileKind::Image(format) => save_image(bytes, &target, format, options).await,
        FileKind::Other => {
            write_atomic(&target, bytes).await?;
            info!("Saved original file: {}", target.display());
            Ok(SavedArtifact::Raw {
                path: target,
                reason: RawReason::NotMedia,
            })
        }
    }
}

async fn save_pdf(
    bytes: &[u8],
    target: &Path,
    options: &SaveOptions,
) -> Result<SavedArtifact, WriteError> {
    match render::render_pdf(bytes.to_vec(), options.dpi, options.max_rendered_pixels).await {
        Ok(pages) => match write_pages(&pages, target, options).await {
            Ok(paths) => {
                info!(
                    "Converted PDF to {} images at {} DPI",
                    paths.len(),
                    options.dpi
                );
                return Ok(SavedArtifact::PdfPages {
                    paths,
                    dpi: options.dpi,
                });
            }
            Err(e) => warn!("PDF processing failed ({e}), trying as image..."),
        },
        Err(e) => warn!("PDF processing failed ({e}), trying as image..."),
    }

    let png_path = target.with_extension("png");
    let as_png = image::load_from_memory(bytes)
        .map_err(|e| e.to_string())
        .and_then(|img| encode(&img, ImageFormat::Png, options.quality).map_err(|e| e.to_string()));
    match as_png {
        Ok(encoded) => match write_atomic(&png_path, &encoded).await {
            Ok(()) => {
                info!("Successfully saved as image: {}", png_path.display());
                return Ok(SavedArtifact::PdfAsImage { path: png_path });
            }
            Err(e) => warn!("Image conversion failed ({e}), saving original file"),
        },
        Err(e) => warn!("Image conversion failed ({e}), saving original file"),
    }

    write_atomic(target, bytes).await?;
    Ok(SavedArtifact::Raw {
        path: target.to_path_buf(),
        reason: RawReason::PdfAndImageFailed,
    })
}

async fn save_image(
    bytes: &[u8],
    target: &Path,
    format: ImageFormat,
    options: &SaveOptions,
) -> Result<SavedArtifact, WriteError> {
    let reencoded = image::load_from_memory(bytes)
        .map_err(|e| e.to_string())
        .and_then(|img| encode(&img, format, options.quality).map_err(|e| e.to_string()));

    match reencoded {
        Ok(encoded) => match write_atomic(target, &encoded).await {
            Ok(()) => {
                info!("Saved image: {}", target.display());
                return Ok(SavedArtifact::Image {
                    path: target.to_path_buf(),
                });
            }
            Err(e) => warn!("Image processing failed ({e}), saving original"),
        },
        Err(e) => warn!("Image processing failed ({e}), saving original"),
    }

    write_atomic(target, bytes).await?;
    Ok(SavedArtifact::Raw {
        path: target.to_path_buf(),
        reason: RawReason::ImageDecodeFailed,
    })
}

/// Write each rendered page as `{stem}_page_{n}.{ext}` next to `target`.
async fn write_pages(
    pages: &[DynamicImage],
    target: &Path,
    options: &SaveOptions,
) -> Result<Vec<PathBuf>, String> {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (format, ext) = match options.page_format {
        PageImageFormat::Png => (ImageFormat::Png, PageImageFormat::Png.extension()),
        PageImageFormat::Jpeg => (ImageFormat::Jpeg, PageImageFormat::Jpeg.extension()),
    };

    let mut paths = Vec::with_capacity(pages.len());
    for (idx, page) in pages.iter().enumerate() {
        let rgb = DynamicImage::ImageRgb8(page.to_rgb8());
        let encoded = encode(&rgb, format, options.quality).map_err(|e| e.to_string())?;
        let path = target.with_file_name(format!("{stem}_page_{}.{ext}", idx + 1));
        write_atomic(&path, &encoded).await.map_err(|e| e.to_string())?;
        debug!("Wrote {} ({} bytes)", path.display(), encoded.len());
        paths.push(path);
    }
    Ok(paths)
}

/// Encode `img` as `format`.
///
/// JPEG uses `quality` and drops alpha; PNG uses best compression with
/// adaptive filtering; everything else uses the codec's defaults.
pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        other => img.write_to(&mut Cursor::new(&mut buf), other)?,
    }
    Ok(buf)
}

/// Write to a `.tmp` sibling, then rename over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let wrap = |source| WriteError {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp_path, bytes).await.map_err(wrap)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(wrap(e));
    }
    Ok(())
}
