//! Per-attempt CI failure artifacts.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::FailureReport;
use crate::io::init::PilotPaths;

/// Persist `report` for `branch_name` and return the artifact path.
///
/// The path depends only on the branch and the report's attempt, so a rerun
/// of the same attempt overwrites its own artifact.
pub fn write_failure_report(
    paths: &PilotPaths,
    branch_name: &str,
    report: &FailureReport,
) -> Result<PathBuf> {
    let path = paths.failure_details_file(branch_name, report.source_attempt);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&path, report.raw_text.as_bytes())
        .with_context(|| format!("write failure details {}", path.display()))?;
    debug!(path = %path.display(), attempt = report.source_attempt, "wrote failure details");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn read_failure_report(path: &Path, attempt: u32) -> FailureReport {
        FailureReport {
            raw_text: fs::read_to_string(path).expect("read failure details"),
            source_attempt: attempt,
        }
    }

    #[test]
    fn report_reads_back_byte_identical() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PilotPaths::new(temp.path());
        let report = FailureReport {
            raw_text: "Job: test (#5) failed.\r\n\ttrailing space \n\u{2717} ünïcode\n".to_string(),
            source_attempt: 3,
        };

        let path = write_failure_report(&paths, "feature/login", &report).expect("write");

        assert!(path.starts_with(&paths.tmp_dir));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("feature-login_failure_details_3.txt")
        );
        assert_eq!(fs::read(&path).expect("bytes"), report.raw_text.as_bytes());
        assert_eq!(read_failure_report(&path, 3), report);
    }

    #[test]
    fn attempts_get_distinct_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PilotPaths::new(temp.path());
        let first = write_failure_report(
            &paths,
            "issue-1",
            &FailureReport {
                raw_text: "one".to_string(),
                source_attempt: 1,
            },
        )
        .expect("write");
        let second = write_failure_report(
            &paths,
            "issue-1",
            &FailureReport {
                raw_text: "two".to_string(),
                source_attempt: 2,
            },
        )
        .expect("write");
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first).expect("read"), "one");
    }
}
