//! Append-only, timestamped transformation report.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use sundew_shared::{Result, SundewError};
use tracing::warn;

/// Local wall-clock timestamp used in report and error-log lines.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Human-readable log of save/skip events, one `[timestamp] message` per line.
#[derive(Debug, Clone)]
pub struct TransformationReport {
    path: PathBuf,
}

impl TransformationReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry. Failures are logged, never propagated: the report
    /// is observability only.
    pub fn record(&self, message: &str) {
        let line = format!("[{}] {message}\n", timestamp());
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "failed to append to transformation report");
        }
    }

    /// All entries in the order they were recorded; empty if none yet.
    pub fn entries(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| SundewError::io(&self.path, e))?;
        Ok(content.lines().map(String::from).collect())
    }
}
