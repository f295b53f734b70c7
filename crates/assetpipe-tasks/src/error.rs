//! Error types for stages and tasks.

use std::io;
use std::path::PathBuf;

/// Errors a pipeline stage can produce.
///
/// `Compile` errors are isolated per file: they are reported and the stream
/// moves on. `Write` errors fail the whole task.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Compile(String),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }
}

/// Errors that fail a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk {}: {message}", path.display())]
    Walk { path: PathBuf, message: String },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}
