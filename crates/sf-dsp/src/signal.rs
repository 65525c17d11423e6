//! Multi-channel time-domain signal container

use ndarray::Array3;
use num_complex::Complex32;

use crate::{DspError, DspResult};

/// Deinterleaved multi-channel audio with sample rate.
///
/// A complex spectrogram can be attached to the signal; `Stft::transform`
/// reuses it instead of recomputing, which lets callers share one transform
/// across the mixture/source views of the same audio.
#[derive(Debug, Clone)]
pub struct Signal {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    stft: Option<Array3<Complex32>>,
}

impl Signal {
    /// Create a signal from per-channel sample buffers.
    ///
    /// All channels must have the same length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> DspResult<Self> {
        if channels.is_empty() {
            return Err(DspError::InvalidInput("signal has no channels".into()));
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(DspError::InvalidInput(
                "signal channels have unequal lengths".into(),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
            stft: None,
        })
    }

    /// Create an all-zero signal.
    pub fn silent(num_channels: usize, num_samples: usize, sample_rate: u32) -> DspResult<Self> {
        Self::new(vec![vec![0.0; num_samples]; num_channels], sample_rate)
    }

    /// Create from interleaved samples.
    pub fn from_interleaved(
        samples: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> DspResult<Self> {
        if num_channels == 0 {
            return Err(DspError::InvalidInput("signal has no channels".into()));
        }
        let num_frames = samples.len() / num_channels;
        let mut channels = vec![vec![0.0; num_frames]; num_channels];
        for (i, chunk) in samples.chunks_exact(num_channels).enumerate() {
            for (ch, &sample) in chunk.iter().enumerate() {
                channels[ch][i] = sample;
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Sample-wise sum of several signals.
    ///
    /// Signals must share sample rate and channel count; shorter signals are
    /// treated as zero-padded to the longest.
    pub fn mix_of(signals: &[Signal]) -> DspResult<Signal> {
        let first = signals
            .first()
            .ok_or_else(|| DspError::InvalidInput("cannot mix zero signals".into()))?;
        let num_channels = first.num_channels();
        let sample_rate = first.sample_rate;
        let mut len = 0;
        for signal in signals {
            if signal.sample_rate != sample_rate {
                return Err(DspError::InvalidInput(format!(
                    "cannot mix signals at {} Hz and {} Hz",
                    sample_rate, signal.sample_rate
                )));
            }
            if signal.num_channels() != num_channels {
                return Err(DspError::ChannelMismatch {
                    expected: num_channels,
                    got: signal.num_channels(),
                });
            }
            len = len.max(signal.num_samples());
        }

        let mut channels = vec![vec![0.0f32; len]; num_channels];
        for signal in signals {
            for (ch, samples) in signal.channels.iter().enumerate() {
                for (i, &sample) in samples.iter().enumerate() {
                    channels[ch][i] += sample;
                }
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames per channel
    pub fn num_samples(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate as f64
    }

    /// One channel's samples
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// All channels
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Mono mixdown (average of channels)
    pub fn to_mono(&self) -> Vec<f32> {
        let frames = self.num_samples();
        let num_channels = self.num_channels() as f32;
        (0..frames)
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / num_channels)
            .collect()
    }

    /// Attach a precomputed complex spectrogram (`[F, T, C]`).
    pub fn set_stft(&mut self, stft: Array3<Complex32>) {
        self.stft = Some(stft);
    }

    /// Attached complex spectrogram, if any.
    pub fn stft(&self) -> Option<&Array3<Complex32>> {
        self.stft.as_ref()
    }

    /// Drop the attached spectrogram.
    pub fn clear_stft(&mut self) {
        self.stft = None;
    }
}
