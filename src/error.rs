use std::path::PathBuf;

/// Errors produced by the evaluation pipeline.
///
/// `Config` errors are never suppressed by the ignore flags; `MissingInput`
/// is governed by `ignore_missing` and `Processing` by `ignore_errors`.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{id} is missing from {dir}")]
    MissingInput { id: String, dir: PathBuf },

    #[error("malformed manifest line {line} in {path}: expected '<id> <text>'")]
    ManifestParse { path: PathBuf, line: usize },

    #[error("invalid input {id} at {path}: {reason}")]
    InvalidInput {
        id: String,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to process {id}: {reason}")]
    Processing { id: String, reason: String },

    #[error("audio error for {path}: {reason}")]
    Audio { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize output: {0}")]
    Output(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
