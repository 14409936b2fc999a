//! Error types for recon-eval operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recon-eval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading test sets or evaluating models.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid pipeline or session configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to decode an input image.
    #[error("Image decode failed: {path}: {reason}")]
    Decode {
        /// Path to the image that failed to decode.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Model artifact missing, ambiguous, or rejected by the loader.
    #[error("Model load failed ({model}): {reason}")]
    ModelLoad {
        /// Model name.
        model: String,
        /// Reason for the failure.
        reason: String,
    },

    /// Model inference failed.
    #[error("Inference failed ({model}): {reason}")]
    Inference {
        /// Model name.
        model: String,
        /// Reason for the failure.
        reason: String,
    },

    /// Image dimensions don't match between target and reconstruction.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected dimensions (width, height).
        expected: (usize, usize),
        /// Actual dimensions (width, height).
        actual: (usize, usize),
    },

    /// Error discovering or indexing the test set.
    #[error("Test set error: {0}")]
    Corpus(String),

    /// Training log could not be interpreted.
    #[error("Training log error: {path}: {reason}")]
    TrainingLog {
        /// Path to the log file.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Failed to encode or write an output image.
    #[error("Image write failed: {path}: {reason}")]
    ImageWrite {
        /// Destination path.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}


impl Error {
    /// Whether the error belongs to one model rather than to the test set
    /// or the output location.
    ///
    /// Evaluation records these per model and keeps going; anything else
    /// aborts the run.
    #[must_use]
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad { .. } | Self::Inference { .. } | Self::ShapeMismatch { .. }
        )
    }
}
