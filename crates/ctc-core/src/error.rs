//! Error types for CTC decoding.

use thiserror::Error;

/// Main error type for CTC decoding operations.
#[derive(Error, Debug)]
pub enum CtcError {
    /// Invalid decoder configuration (beam width, fusion settings, label ids).
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed log-probability table (ragged rows, empty vocabulary, rank).
    #[error("Shape error: {0}")]
    Shape(String),

    /// External scorer failures.
    #[error("Scorer error: {0}")]
    Scorer(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CTC decoding operations.
pub type CtcResult<T> = Result<T, CtcError>;
