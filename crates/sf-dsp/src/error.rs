//! DSP error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DspError {
    /// Invalid transform parameters
    #[error("Invalid STFT parameters: {0}")]
    InvalidParams(String),

    /// Malformed input signal
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel count mismatch
    #[error("Channel count mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    /// FFT processing failed
    #[error("FFT failed: {0}")]
    Fft(String),
}

pub type DspResult<T> = Result<T, DspError>;
