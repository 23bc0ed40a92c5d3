//! Target filename construction from a sheet row.
//!
//! The stem comes from the name column (column B by default, typically the
//! invoice number) and the extension from the file's name on
//! Drive, so `Scan 2023-01.PDF` linked from a row whose column B holds
//! `INV #1042` lands on disk as `INV1042.PDF`.

/// Stem used when the name cell is missing, empty, or sanitises to nothing.
pub const FALLBACK_STEM: &str = "no_invoice_num";

/// Build `{sanitised name cell}{original extension}` for a row.
pub fn safe_filename(row: &[String], name_column: usize, original_name: &str) -> String {
    let ext = extension_of(original_name);

    let raw = row
        .get(name_column)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or(FALLBACK_STEM);

    let mut stem = sanitise_stem(raw);
    if stem.is_empty() {
        stem = FALLBACK_STEM.to_string();
    }

    format!("{stem}{ext}").replace(' ', "_")
}

/// Keep alphanumerics (any script), `-` and `_`.
pub fn sanitise_stem(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// The extension of the last path component including its dot, or `""`.
///
/// Leading dots do not start an extension (`.bashrc` has none), and the
/// result is reduced to alphanumerics so a Drive name can never smuggle a
/// path separator into the target filename.
pub fn extension_of(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let trimmed = base.trim_start_matches('.');
    match trimmed.rfind('.') {
        Some(pos) => {
            let ext: String = trimmed[pos + 1..]
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if ext.is_empty() {
                String::new()
            } else {
                format!(".{ext}")
            }
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn uses_column_b_and_original_extension() {
        let r = row(&["2024-01-02", "INV-1042", "ACME"]);
        assert_eq!(safe_filename(&r, 1, "scan.pdf"), "INV-1042.pdf");
    }

    #[test]
    fn strips_special_characters() {
        let r = row(&["x", "INV #10/42 (final)"]);
        assert_eq!(safe_filename(&r, 1, "a.jpg"), "INV1042final.jpg");
    }

    #[test]
    fn keeps_unicode_letters_and_underscores() {
        let r = row(&["x", "Rechnung_Müller-7"]);
        assert_eq!(safe_filename(&r, 1, "r.png"), "Rechnung_Müller-7.png");
    }

    #[test]
    fn missing_or_empty_cell_falls_back() {
        assert_eq!(safe_filename(&row(&["only A"]), 1, "f.pdf"), "no_invoice_num.pdf");
        assert_eq!(safe_filename(&row(&["a", ""]), 1, "f.pdf"), "no_invoice_num.pdf");
        assert_eq!(safe_filename(&row(&["a", "###"]), 1, "f.pdf"), "no_invoice_num.pdf");
    }

    #[test]
    fn preserves_extension_case() {
        let r = row(&["a", "7"]);
        assert_eq!(safe_filename(&r, 1, "SCAN.JPEG"), "7.JPEG");
    }

    #[test]
    fn no_extension() {
        let r = row(&["a", "7"]);
        assert_eq!(safe_filename(&r, 1, "README"), "7");
        assert_eq!(safe_filename(&r, 1, ".hidden"), "7");
    }

    #[test]
    fn extension_of_matches_splitext() {
        assert_eq!(extension_of("a.tar.gz"), ".gz");
        assert_eq!(extension_of("photo.JPG"), ".JPG");
        assert_eq!(extension_of(".bashrc"), "");
        assert_eq!(extension_of("..hidden.txt"), ".txt");
        assert_eq!(extension_of("trailingdot."), "");
    }

    #[test]
    fn extension_cannot_inject_separators() {
        assert_eq!(extension_of("evil.p/../df"), "");
        assert_eq!(extension_of("weird.p d f"), ".pdf");
    }

    #[test]
    fn custom_name_column() {
        let r = row(&["a", "b", "c", "Q3 report"]);
        assert_eq!(safe_filename(&r, 3, "x.xlsx"), "Q3report.xlsx");
    }
}
