//! Error types for rust-sproc-analyzer

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while analyzing procedures.
///
/// Only I/O and serialization problems surface here; heuristic stages
/// degrade to empty results instead of failing.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Failed to read SQL file: {path}")]
    InputReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input path does not exist: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Output path must be a directory when the input is a directory: {path}")]
    OutputNotDirectory { path: PathBuf },

    #[error("Output path must be a file when the input is a file: {path}")]
    OutputIsDirectory { path: PathBuf },

    #[error("Failed to write analysis to {path}")]
    OutputWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize analysis document")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("{failed} of {total} procedures failed to analyze")]
    BatchFailed { failed: usize, total: usize },
}
