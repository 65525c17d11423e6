//! sf-dsp: Signal container and STFT front end
//!
//! Provides the time-domain building blocks for the example pipeline:
//! - `Signal`: deinterleaved multi-channel audio with an optional attached
//!   complex spectrogram
//! - `Stft`: planned forward real FFT with Hann windowing, centered
//!   (reflect-padded) or plain framing, and an amplitude-to-dB log branch

mod error;
mod signal;
mod stft;

pub use error::{DspError, DspResult};
pub use signal::Signal;
pub use stft::{Stft, StftParams, amplitude_to_db, hann_window};
