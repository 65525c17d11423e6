//! Pipeline error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    /// Audio file could not be read or decoded
    #[error("File error: {0}")]
    File(#[from] sf_file::FileError),

    /// Transform failure
    #[error("DSP error: {0}")]
    Dsp(#[from] sf_dsp::DspError),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor shapes do not line up
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Example index outside the usable range
    #[error("Index {index} out of range for {len} examples")]
    IndexOutOfRange { index: usize, len: usize },

    /// A resident cache entry failed to deserialize
    #[error("Cache entry {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DataResult<T> = Result<T, DataError>;
