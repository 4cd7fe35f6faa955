//! Post-mortem inspection of ccore log files.
//!
//! ccore tags diagnostics with `ERR`/`WRN` and writes a fixed phrase when an
//! operation completes. The two are reported separately; pipelines decide which
//! one gates a stage.
use crate::util::truncate_string;
use serde::Serialize;
use std::path::Path;

const MARKERS: [&str; 2] = ["ERR", "WRN"];

/// Longest marker line kept in a report; ccore occasionally dumps whole PGN games.
const MAX_MARKER_LINE_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerLine {
    pub line_number: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogReport {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<String>,
    pub sentinel_found: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub marker_lines: Vec<MarkerLine>,
}

impl LogReport {
    pub fn has_marker(&self) -> bool {
        !self.marker_lines.is_empty()
    }
}

/// Scan every line of `path` for markers and, optionally, a sentinel phrase.
///
/// The sentinel is a case-sensitive literal substring. A missing or unreadable
/// log reports nothing found.
pub fn inspect_log(path: &Path, sentinel: Option<&str>) -> LogReport {
    let mut report = LogReport {
        path: path.display().to_string(),
        exists: false,
        sentinel: sentinel.map(str::to_string),
        sentinel_found: false,
        marker_lines: Vec::new(),
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(log = %path.display(), error = %err, "cannot read logfile");
            }
            return report;
        }
    };
    report.exists = true;

    let text = String::from_utf8_lossy(&bytes);
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if MARKERS.iter().any(|marker| line.contains(marker)) {
            tracing::warn!(log = %path.display(), line = idx + 1, "{line}");
            report.marker_lines.push(MarkerLine {
                line_number: idx + 1,
                text: truncate_string(line, MAX_MARKER_LINE_BYTES),
            });
        }
        if let Some(sentinel) = sentinel {
            if !report.sentinel_found && line.contains(sentinel) {
                report.sentinel_found = true;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_log_reports_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = inspect_log(&temp.path().join("absent.log"), Some("Database is valid"));
        assert!(!report.exists);
        assert!(!report.has_marker());
        assert!(!report.sentinel_found);
    }

    #[test]
    fn every_marker_line_is_collected_not_just_the_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("copy1.log");
        fs::write(
            &log,
            "INF opening database\nWRN game 12 has no result\nINF copying\nERR game 40 truncated\n",
        )
        .expect("write log");

        let report = inspect_log(&log, None);
        assert!(report.exists);
        assert_eq!(
            report.marker_lines,
            vec![
                MarkerLine {
                    line_number: 2,
                    text: "WRN game 12 has no result".to_string(),
                },
                MarkerLine {
                    line_number: 4,
                    text: "ERR game 40 truncated".to_string(),
                },
            ]
        );
        assert!(!report.sentinel_found);
    }

    #[test]
    fn sentinel_and_markers_are_independent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("copy1.log");
        fs::write(&log, "ERR disk full\nSuccessfully copied database\n").expect("write log");
        let report = inspect_log(&log, Some("Successfully copied database"));
        assert!(report.has_marker());
        assert!(report.sentinel_found);

        fs::write(&log, "WRN unrelated\n").expect("rewrite log");
        let report = inspect_log(&log, Some("Successfully copied database"));
        assert!(report.has_marker());
        assert!(!report.sentinel_found);
    }

    #[test]
    fn sentinel_match_is_case_sensitive_substring() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("validate1.log");
        fs::write(&log, "INF database is valid\r\n").expect("write log");
        assert!(!inspect_log(&log, Some("Database is valid")).sentinel_found);

        fs::write(&log, "12:00:01 INF Database is valid (1200 games)\r\n").expect("write log");
        assert!(inspect_log(&log, Some("Database is valid")).sentinel_found);
    }
}
