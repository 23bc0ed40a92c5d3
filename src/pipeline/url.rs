//! Drive link parsing: pull the file id out of whatever URL shape a human
//! pasted into the sheet.
//!
//! Patterns are tried in a fixed order, most specific first:
//!
//! 1. `…/file/d/<ID>/view?usp=sharing`
//! 2. `…/open?id=<ID>&…`
//! 3. any `drive.google.com` / `docs.google.com` link with an `id=` query
//!    parameter (`uc?id=`, `uc?export=download&id=`)
//! 4. `…/d/<ID>/…` as used by Docs, Sheets and Slides links
//!
//! The id runs until the next path, query, or fragment delimiter, so a
//! trailing `?usp=sharing` never leaks into the id.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_FILE_D: Lazy<Regex> = Lazy::new(|| Regex::new(r"/file/d/([^/?#&\s]*)").unwrap());

static RE_OPEN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"open\?id=([^&#\s]*)").unwrap());

static RE_ID_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:drive|docs)\.google\.com/[^#\s]*[?&]id=([^&#\s]*)").unwrap()
});

static RE_SLASH_D: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:drive|docs)\.google\.com/[^?#\s]*?/d/([^/?#&\s]*)").unwrap()
});

/// Extract a Drive file id from a URL, or `None` if no pattern matches.
///
/// An empty capture (e.g. `…/file/d/`) is treated as no match.
pub fn extract_file_id(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    // Order matters: `/file/d/` also contains `/d/`.
    let caps = if url.contains("/file/d/") {
        RE_FILE_D.captures(url)
    } else if url.contains("open?id=") {
        RE_OPEN_ID.captures(url)
    } else if let Some(c) = RE_ID_PARAM.captures(url) {
        Some(c)
    } else {
        RE_SLASH_D.captures(url)
    };

    caps.and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_d_view_link() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbC-dEf_123/view?usp=sharing"),
            Some("1AbC-dEf_123".into())
        );
    }

    #[test]
    fn file_d_without_trailing_path() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbC"),
            Some("1AbC".into())
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbC?usp=drive_link"),
            Some("1AbC".into())
        );
    }

    #[test]
    fn open_id_link() {
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=XYZ789&authuser=0"),
            Some("XYZ789".into())
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=XYZ789"),
            Some("XYZ789".into())
        );
    }

    #[test]
    fn uc_download_link() {
        assert_eq!(
            extract_file_id("https://drive.google.com/uc?export=download&id=QQQ"),
            Some("QQQ".into())
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/uc?id=QQQ&export=download"),
            Some("QQQ".into())
        );
    }

    #[test]
    fn docs_slash_d_link() {
        assert_eq!(
            extract_file_id("https://docs.google.com/document/d/DOC42/edit#heading=h.1"),
            Some("DOC42".into())
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            extract_file_id("  https://drive.google.com/file/d/ABC/view \n"),
            Some("ABC".into())
        );
    }

    #[test]
    fn unrecognised_urls() {
        assert_eq!(extract_file_id(""), None);
        assert_eq!(extract_file_id("   "), None);
        assert_eq!(extract_file_id("not a url"), None);
        assert_eq!(extract_file_id("https://example.com/report.pdf"), None);
        assert_eq!(extract_file_id("https://example.com/page?id=123"), None);
        assert_eq!(extract_file_id("https://example.com/d/abc"), None);
    }

    #[test]
    fn empty_id_is_none() {
        assert_eq!(extract_file_id("https://drive.google.com/file/d/"), None);
        assert_eq!(extract_file_id("https://drive.google.com/open?id="), None);
    }
}
