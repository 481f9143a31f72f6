//! Append-only diagnostic log at `data/logs/twp.txt`. One multi-line entry
//! per notable event. Logging never fails a turn; write errors are demoted to
//! tracing warnings.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DiagLog {
    path: PathBuf,
}

impl DiagLog {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            path: base_dir.join("data").join("logs").join("twp.txt"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry: a timestamped header line followed by the detail
    /// block, indented so entries stay visually separable.
    pub fn record(&self, event: &str, detail: &str) {
        if let Err(e) = self.try_record(event, detail) {
            warn!(error = %e, path = %self.path.display(), "diagnostic log write failed");
        }
    }

    fn try_record(&self, event: &str, detail: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        writeln!(file, "[{timestamp}] {event}")?;
        for line in detail.lines() {
            writeln!(file, "    {line}")?;
        }
        Ok(())
    }
}
