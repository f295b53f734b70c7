//! Error reports and the notifier seam.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// A stage failure captured by the pipeline runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Task the failure happened in
    pub task: String,
    /// Stage that failed
    pub stage: String,
    /// Source file being processed
    pub file: PathBuf,
    /// Notification title (e.g. "SCSS error")
    pub title: String,
    /// Underlying error message
    pub message: String,
}

impl ErrorReport {
    /// Message as shown to the user.
    pub fn formatted(&self) -> String {
        format!("Error: {}", self.message)
    }
}

/// Receives reload signals and error reports from running tasks.
pub trait Notifier: Send + Sync {
    /// An output file was written and browsers should reload.
    fn reload(&self, path: &Path);

    /// A file failed a stage and was skipped.
    fn error(&self, report: &ErrorReport);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn reload(&self, path: &Path) {
        tracing::debug!("Reload: {}", path.display());
    }

    fn error(&self, report: &ErrorReport) {
        tracing::error!(
            task = %report.task,
            stage = %report.stage,
            file = %report.file.display(),
            "{}: {}",
            report.title,
            report.formatted()
        );
    }
}
