//! Error types for Larder.

use std::path::PathBuf;

use thiserror::Error;

/// Larder error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Scan target does not exist or is not a directory
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Model file passed to a load does not exist
    #[error("Model file not found: {0}")]
    ModelFileNotFound(PathBuf),

    /// A loaded model is already cached under this identifier
    #[error("Model '{0}' is already loaded")]
    DuplicateKey(String),

    /// External loader failure, passed through unchanged
    #[error("Model load failed: {0}")]
    Load(String),

    /// Cooperative cancellation was observed
    #[error("Model load cancelled")]
    Cancelled,

    /// Releasing a model handle failed
    #[error("Failed to release model '{model_id}': {message}")]
    Release { model_id: String, message: String },

    /// The model handle was used after it was released
    #[error("Model '{0}' has been released")]
    Released(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a load error from any displayable loader failure.
    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::Load(err.to_string())
    }
}

/// Result type alias for Larder operations.
pub type Result<T> = std::result::Result<T, Error>;
