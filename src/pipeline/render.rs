//! PDF rasterisation: render every page of an in-memory PDF to an image.
//!
//! pdfium wraps a C++ library with thread-local state, so the work runs in
//! `tokio::task::spawn_blocking` and the caller awaits the result before the
//! next row starts.
//!
//! PDF user space is 72 units per inch; a page is scaled by `dpi / 72`, then
//! capped at `max_pixels` on either edge so a poster-size page cannot exhaust
//! memory.

use crate::pipeline::engine;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

/// Why a PDF could not be rasterised. Every variant sends the save chain to
/// its image fallback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("pdfium unavailable: {0}")]
    Engine(String),
    #[error("not a readable PDF: {0}")]
    Load(String),
    #[error("empty PDF document")]
    Empty,
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
    #[error("render task panicked: {0}")]
    Panicked(String),
}

/// Render all pages of `bytes` at `dpi`, returned in page order.
pub async fn render_pdf(
    bytes: Vec<u8>,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, RenderError> {
    tokio::task::spawn_blocking(move || render_pdf_blocking(&bytes, dpi, max_pixels))
        .await
        .map_err(|e| RenderError::Panicked(e.to_string()))?
}

/// Blocking implementation of page rendering.
fn render_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, RenderError> {
    let pdfium = engine::bind().map_err(RenderError::Engine)?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::Load(format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(RenderError::Empty);
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(zoom_for_dpi(dpi))
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {}/{} → {}x{} px",
            idx + 1,
            total,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

/// Scale factor from PDF points to pixels at `dpi`.
pub fn zoom_for_dpi(dpi: u32) -> f32 {
    dpi as f32 / 72.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_matches_points_per_inch() {
        assert_eq!(zoom_for_dpi(72), 1.0);
        assert!((zoom_for_dpi(300) - 4.1666665).abs() < 1e-5);
        assert_eq!(zoom_for_dpi(144), 2.0);
    }

    #[test]
    fn render_error_display() {
        assert_eq!(RenderError::Empty.to_string(), "empty PDF document");
        let e = RenderError::Page {
            page: 2,
            detail: "oom".into(),
        };
        assert_eq!(e.to_string(), "page 2: oom");
    }
}
