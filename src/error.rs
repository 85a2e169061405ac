// error.rs

use thiserror::Error;

/// Errors raised by the preprocessing library.
///
/// Validation failures (`InvalidArgument`, `IllegalState`, `DimensionMismatch`,
/// `InsufficientSamples`, `InsufficientProbes`) are returned straight to the caller.
/// Data-quality problems are logged and skipped instead of being turned into errors.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Too few samples: {found} (at least {required} needed)")]
    InsufficientSamples { found: usize, required: usize },

    #[error("Too few probes left after filtering: {found} (at least {required} needed)")]
    InsufficientProbes { found: usize, required: usize },

    #[error("Parse error in {source_name} line {line}: {reason}")]
    Parse {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl From<String> for PreprocessError {
    fn from(s: String) -> Self {
        PreprocessError::InvalidArgument(s)
    }
}

impl From<&str> for PreprocessError {
    fn from(s: &str) -> Self {
        PreprocessError::InvalidArgument(s.to_string())
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PreprocessError>;
