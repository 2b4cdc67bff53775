use chrono::Utc;

/// Fallback content type for uploads that arrive without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Derive the catalog file type from a filename extension.
///
/// The extension is uppercased so that searches like `file_type=PDF` match
/// regardless of how the client named the file. Files without an extension
/// are catalogued as `UNKNOWN`.
pub fn file_extension(filename: &str) -> String {
    match split_filename(filename) {
        (_, ext) if !ext.is_empty() => ext.trim_start_matches('.').to_uppercase(),
        _ => "UNKNOWN".to_string(),
    }
}

/// Split a filename into (base, extension). The extension includes the
/// leading dot, matching the collision-counter insertion point.
pub fn split_filename(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        // A leading dot is a hidden file, not an extension.
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Sanitize a client-supplied filename for use as an object key component.
///
/// The base name keeps only `[A-Za-z0-9-_]`, everything else becomes `_`.
/// An empty base name (e.g. `"...txt"` or `"§§.pdf"`) is replaced with a
/// timestamp-derived name so the upload still lands somewhere sensible.
/// The extension is reduced to its alphanumeric characters.
pub fn sanitize_filename(filename: &str) -> String {
    let (base, ext) = split_filename(filename);

    let mut sane_base: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    if sane_base.trim_matches('_').is_empty() {
        sane_base = format!("upload_{}", Utc::now().format("%Y%m%d%H%M%S%f"));
    }

    let sane_ext: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if sane_ext.is_empty() {
        sane_base
    } else {
        format!("{}.{}", sane_base, sane_ext)
    }
}

/// Sanitize a research project id into an object key prefix.
///
/// Returns either the empty string or a prefix ending in `/`, so callers can
/// always concatenate it in front of a filename.
pub fn sanitize_project_id(project_id: &str) -> String {
    let sane: String = project_id
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    let sane = sane.trim_matches('_');
    if sane.is_empty() {
        String::new()
    } else {
        format!("{}/", sane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("report.pdf"), "PDF");
        assert_eq!(file_extension("run01.mat"), "MAT");
        assert_eq!(file_extension("archive.tar.gz"), "GZ");
        assert_eq!(file_extension("README"), "UNKNOWN");
        assert_eq!(file_extension(".gitignore"), "UNKNOWN");
    }

    #[test]
    fn test_split_filename() {
        assert_eq!(split_filename("data.csv"), ("data", ".csv"));
        assert_eq!(split_filename("no_ext"), ("no_ext", ""));
        assert_eq!(split_filename(".hidden"), (".hidden", ""));
        assert_eq!(split_filename("a.b.c"), ("a.b", ".c"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("run 01 (final).mat"), "run_01__final_.mat");
        assert_eq!(sanitize_filename("clean-name_v2.csv"), "clean-name_v2.csv");
        assert_eq!(sanitize_filename("weird.ext!?"), "weird.ext");
    }

    #[test]
    fn test_sanitize_filename_empty_base_gets_timestamp() {
        let sanitized = sanitize_filename("§§§.pdf");
        assert!(sanitized.starts_with("upload_"));
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn test_sanitize_project_id() {
        assert_eq!(sanitize_project_id("PROJ-042"), "PROJ-042/");
        assert_eq!(sanitize_project_id("  lab experiment  "), "lab_experiment/");
        assert_eq!(sanitize_project_id("___"), "");
        assert_eq!(sanitize_project_id(""), "");
    }
}
