//! PDFium engine: make sure a pdfium shared library is on disk, then bind it.
//!
//! Resolution order (first hit wins):
//!
//! 1. `PDFIUM_LIB_PATH` pointing at an existing library file.
//! 2. A previously downloaded copy in [`engine_cache_dir`].
//! 3. Download of the platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    extracting only the shared library into the cache directory.
//!
//! Binding happens per document inside the render thread; when nothing was
//! resolved the system library search path is tried as a last resort.

use crate::error::FetchError;
use futures::StreamExt;
use pdfium_render::prelude::Pdfium;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

static RESOLVED: OnceLock<PathBuf> = OnceLock::new();

/// Platform archive name and the library's location inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformAsset {
    pub archive: &'static str,
    pub member: &'static str,
    pub lib_name: &'static str,
}

/// Map the running OS/arch to its pdfium-binaries asset.
pub fn platform_asset() -> Option<PlatformAsset> {
    let asset = |archive, member, lib_name| PlatformAsset {
        archive,
        member,
        lib_name,
    };
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Some(asset("pdfium-linux-x64.tgz", "lib/libpdfium.so", "libpdfium.so")),
        ("linux", "aarch64") => Some(asset("pdfium-linux-arm64.tgz", "lib/libpdfium.so", "libpdfium.so")),
        ("macos", "x86_64") => Some(asset("pdfium-mac-x64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib")),
        ("macos", "aarch64") => Some(asset("pdfium-mac-arm64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib")),
        ("windows", "x86_64") => Some(asset("pdfium-win-x64.tgz", "bin/pdfium.dll", "pdfium.dll")),
        ("windows", "aarch64") => Some(asset("pdfium-win-arm64.tgz", "bin/pdfium.dll", "pdfium.dll")),
        ("windows", "x86") => Some(asset("pdfium-win-x86.tgz", "bin/pdfium.dll", "pdfium.dll")),
        _ => None,
    }
}

/// Per-version cache directory for the engine.
///
/// `SHEETFETCH_PDFIUM_CACHE_DIR` overrides the base; otherwise the platform
/// cache directory (`~/.cache` on Linux) is used.
pub fn engine_cache_dir() -> PathBuf {
    let base = match std::env::var("SHEETFETCH_PDFIUM_CACHE_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(std::env::temp_dir)
            .join("sheetfetch"),
    };
    base.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Library path already available without network access, if any.
pub fn cached_engine_path() -> Option<PathBuf> {
    if let Some(p) = RESOLVED.get() {
        return Some(p.clone());
    }
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(p);
        if p.is_file() {
            return Some(p);
        }
    }
    let asset = platform_asset()?;
    let p = engine_cache_dir().join(asset.lib_name);
    p.is_file().then_some(p)
}

/// Make the engine available, downloading it on first use.
///
/// `on_progress` receives `(downloaded, total)` for each archive chunk.
pub async fn ensure_engine(
    on_progress: Option<&(dyn Fn(u64, Option<u64>) + Send + Sync)>,
) -> Result<PathBuf, FetchError> {
    if let Some(p) = cached_engine_path() {
        debug!("pdfium engine at {}", p.display());
        let _ = RESOLVED.set(p.clone());
        return Ok(p);
    }

    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        warn!("PDFIUM_LIB_PATH '{}' does not exist; downloading instead", p);
    }

    let asset = platform_asset().ok_or_else(|| {
        FetchError::PdfiumUnavailable(format!(
            "no prebuilt pdfium for {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    })?;

    let dir = engine_cache_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| FetchError::PdfiumUnavailable(format!("{}: {e}", dir.display())))?;

    let url = format!("{BASE_URL}/chromium%2F{PDFIUM_VERSION}/{}", asset.archive);
    info!("Downloading pdfium engine from {}", url);
    let archive = download_archive(&url, on_progress).await?;

    let dest = dir.join(asset.lib_name);
    let dest_clone = dest.clone();
    tokio::task::spawn_blocking(move || extract_member(&archive, asset.member, &dest_clone))
        .await
        .map_err(|e| FetchError::Internal(format!("extract task panicked: {e}")))??;

    info!("pdfium engine cached at {}", dest.display());
    let _ = RESOLVED.set(dest.clone());
    Ok(dest)
}

/// Bind pdfium: the resolved library if known, else the system search path.
pub fn bind() -> Result<Pdfium, String> {
    let bindings = match cached_engine_path() {
        Some(path) => Pdfium::bind_to_library(&path)
            .map_err(|e| format!("bind {}: {e}", path.display()))?,
        None => Pdfium::bind_to_system_library().map_err(|e| format!("bind system pdfium: {e}"))?,
    };
    Ok(Pdfium::new(bindings))
}

async fn download_archive(
    url: &str,
    on_progress: Option<&(dyn Fn(u64, Option<u64>) + Send + Sync)>,
) -> Result<Vec<u8>, FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("edgequake-sheetfetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| FetchError::PdfiumUnavailable(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::PdfiumUnavailable(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(FetchError::PdfiumUnavailable(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(32 * 1024 * 1024) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::PdfiumUnavailable(format!("read: {e}")))?;
        buf.extend_from_slice(&chunk);
        if let Some(cb) = on_progress {
            cb(buf.len() as u64, total);
        }
    }
    Ok(buf)
}

/// Unpack one member of a `.tgz` archive to `dest`.
fn extract_member(archive: &[u8], member: &str, dest: &Path) -> Result<(), FetchError> {
    let gz = flate2::read::GzDecoder::new(archive);
    let mut tar = tar::Archive::new(gz);

    let entries = tar
        .entries()
        .map_err(|e| FetchError::PdfiumUnavailable(format!("archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::PdfiumUnavailable(format!("archive: {e}")))?;
        let is_member = entry
            .path()
            .map(|p| p.to_string_lossy().trim_start_matches("./") == member)
            .unwrap_or(false);
        if is_member {
            entry
                .unpack(dest)
                .map_err(|e| FetchError::PdfiumUnavailable(format!("unpack: {e}")))?;
            return Ok(());
        }
    }

    Err(FetchError::PdfiumUnavailable(format!(
        "'{member}' not found in archive"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_contains_version() {
        let d = engine_cache_dir();
        assert!(d.to_string_lossy().contains(PDFIUM_VERSION));
        assert_eq!(d, engine_cache_dir());
    }

    #[test]
    fn current_platform_has_asset() {
        if let Some(asset) = platform_asset() {
            assert!(asset.archive.ends_with(".tgz"));
            assert!(asset.member.ends_with(asset.lib_name));
        }
    }

    #[test]
    fn extract_member_finds_library() {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::fast(),
        ));
        let payload = b"not really a shared object";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "lib/libpdfium.so", &payload[..])
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("libpdfium.so");
        extract_member(&archive, "lib/libpdfium.so", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[test]
    fn extract_member_reports_missing() {
        let builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::fast(),
        ));
        let archive = builder.into_inner().unwrap().finish().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = extract_member(&archive, "lib/libpdfium.so", &dir.path().join("x")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
