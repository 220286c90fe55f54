//! Filename hygiene for uploaded documents.
//!
//! Uploaded filenames become storage paths, vector payload fields, and (for tabular files) the
//! seed for SQL table names, so anything outside a conservative character set is normalized
//! before it reaches those layers.

/// Sanitize an uploaded filename for storage and payload use.
///
/// Keeps ASCII alphanumerics plus `.`, `-` and `_`; every other character becomes `_`. Path
/// separators are stripped first so a hostile `../../etc/passwd` collapses to its final
/// component. Empty results fall back to `upload`.
pub(crate) fn sanitize_filename(raw: &str) -> String {
    let basename = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim();

    let mut sanitized: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while sanitized.starts_with('.') {
        sanitized.remove(0);
    }

    if sanitized.is_empty() {
        sanitized.push_str("upload");
    }
    sanitized
}

/// Derive the table-name seed from a filename: the part before the first `.`, lowercased, with
/// spaces replaced by underscores. Further SQL-level sanitization happens when the table is
/// registered.
pub(crate) fn file_stem_for_table(filename: &str) -> String {
    let stem = filename.split('.').next().unwrap_or(filename);
    stem.replace(' ', "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_clean_names_through() {
        assert_eq!(sanitize_filename("report-2024_v2.pdf"), "report-2024_v2.pdf");
    }

    #[test]
    fn replaces_disallowed_characters() {
        assert_eq!(sanitize_filename("budget (final).xlsx"), "budget__final_.xlsx");
        assert_eq!(sanitize_filename("naïve notes.txt"), "na_ve_notes.txt");
    }

    #[test]
    fn strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\data.csv"), "data.csv");
    }

    #[test]
    fn rejects_leading_dots() {
        assert_eq!(sanitize_filename(".hidden.txt"), "hidden.txt");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("   "), "upload");
    }

    #[test]
    fn stem_lowercases_and_replaces_spaces() {
        assert_eq!(file_stem_for_table("Sales Q3.csv"), "sales_q3");
        assert_eq!(file_stem_for_table("inventory.backup.xlsx"), "inventory");
        assert_eq!(file_stem_for_table("plain"), "plain");
    }
}
