//! sf-file: Audio File Import
//!
//! Decodes corpus audio into deinterleaved f32 buffers:
//! - WAV (via hound) - native, lossless
//! - FLAC (via symphonia) - compressed, lossless
//! - MP3 (via symphonia) - compressed, lossy
//! - OGG Vorbis (via symphonia) - compressed, lossy
//!
//! Also provides linear-interpolation resampling so every decoded signal can
//! be brought to the pipeline sample rate.

mod audio_file;
mod error;
mod resample;

pub use audio_file::*;
pub use error::*;
pub use resample::*;
