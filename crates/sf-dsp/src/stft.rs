//! Short-Time Fourier Transform
//!
//! Forward real FFT with Hann analysis window. Two framing modes:
//! - centered: the signal is reflect-padded by half a window on both sides,
//!   giving `len/hop + 1` frames with frame centers aligned to hop positions
//! - plain: frames are taken from the raw signal, giving
//!   `(len - window)/hop + 1` frames

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array3;
use num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use crate::{DspError, DspResult, Signal};

/// Magnitude floor for dB conversion
const AMIN: f32 = 1e-5;

/// STFT framing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StftParams {
    /// Analysis window length (FFT size)
    pub window_length: usize,
    /// Hop between frame starts
    pub hop_length: usize,
    /// Reflect-padded centered framing
    pub centered: bool,
}

impl Default for StftParams {
    fn default() -> Self {
        Self {
            window_length: 2048,
            hop_length: 512,
            centered: true,
        }
    }
}

impl StftParams {
    pub fn validate(&self) -> DspResult<()> {
        if self.window_length == 0 {
            return Err(DspError::InvalidParams("window_length must be > 0".into()));
        }
        if self.hop_length == 0 {
            return Err(DspError::InvalidParams("hop_length must be > 0".into()));
        }
        if self.hop_length > self.window_length {
            return Err(DspError::InvalidParams(format!(
                "hop_length {} exceeds window_length {}",
                self.hop_length, self.window_length
            )));
        }
        Ok(())
    }
}

/// Planned forward transform.
///
/// Planning happens once at construction; `process` is reusable across
/// signals and safe to call from multiple threads (scratch buffers are local
/// to each call).
pub struct Stft {
    params: StftParams,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

impl Stft {
    pub fn new(params: StftParams) -> DspResult<Self> {
        params.validate()?;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.window_length);
        let window = hann_window(params.window_length);
        Ok(Self {
            params,
            fft,
            window,
        })
    }

    pub fn params(&self) -> &StftParams {
        &self.params
    }

    /// Number of frequency bins in the transform output
    pub fn num_bins(&self) -> usize {
        self.params.window_length / 2 + 1
    }

    /// Number of frames produced for a signal of `num_samples`
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if self.params.centered {
            num_samples / self.params.hop_length + 1
        } else if num_samples <= self.params.window_length {
            1
        } else {
            (num_samples - self.params.window_length) / self.params.hop_length + 1
        }
    }

    /// Complex spectrogram of every channel, shape `[F, T, C]`.
    pub fn process(&self, signal: &Signal) -> DspResult<Array3<Complex32>> {
        let num_bins = self.num_bins();
        let num_frames = self.num_frames(signal.num_samples());
        let num_channels = signal.num_channels();

        let mut out = Array3::zeros((num_bins, num_frames, num_channels));
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();

        for (ch, samples) in signal.channels().iter().enumerate() {
            for frame in 0..num_frames {
                self.fill_frame(samples, frame, &mut input);
                self.fft
                    .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                    .map_err(|e| DspError::Fft(e.to_string()))?;
                for (bin, &value) in spectrum.iter().enumerate() {
                    out[[bin, frame, ch]] = value;
                }
            }
        }
        Ok(out)
    }

    /// `(log_spectrogram, complex_spectrogram)` for a signal.
    ///
    /// An attached spectrogram on the signal is reused instead of
    /// recomputing. The log branch is `20*log10(|X|)` with a small magnitude
    /// floor.
    pub fn transform(&self, signal: &Signal) -> DspResult<(Array3<f32>, Array3<Complex32>)> {
        let stft = match signal.stft() {
            Some(existing) => existing.clone(),
            None => self.process(signal)?,
        };
        let log_spectrogram = stft.mapv(|z| amplitude_to_db(z.norm()));
        Ok((log_spectrogram, stft))
    }

    fn fill_frame(&self, samples: &[f32], frame: usize, input: &mut [f32]) {
        let n = self.params.window_length;
        let start = frame * self.params.hop_length;

        if self.params.centered {
            let half = (n / 2) as isize;
            for i in 0..n {
                let pos = start as isize + i as isize - half;
                let sample = if samples.is_empty() {
                    0.0
                } else {
                    samples[reflect_index(pos, samples.len())]
                };
                input[i] = sample * self.window[i];
            }
        } else {
            for i in 0..n {
                let sample = samples.get(start + i).copied().unwrap_or(0.0);
                input[i] = sample * self.window[i];
            }
        }
    }
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Amplitude to decibels with a magnitude floor
pub fn amplitude_to_db(magnitude: f32) -> f32 {
    20.0 * magnitude.max(AMIN).log10()
}

/// Reflect (mirror without edge repetition) an out-of-range index
fn reflect_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut folded = index.rem_euclid(period);
    if folded >= len as isize {
        folded = period - folded;
    }
    folded as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, num_samples: usize) -> Signal {
        let samples: Vec<f32> = (0..num_samples)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        Signal::new(vec![samples], sample_rate).unwrap()
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(512);
        assert_eq!(window.len(), 512);
        assert!(window[0].abs() < 1e-6);
        assert!((window[256] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_params_validation() {
        assert!(
            StftParams {
                window_length: 0,
                hop_length: 1,
                centered: true
            }
            .validate()
            .is_err()
        );
        assert!(
            StftParams {
                window_length: 512,
                hop_length: 1024,
                centered: true
            }
            .validate()
            .is_err()
        );
        assert!(StftParams::default().validate().is_ok());
    }

    #[test]
    fn test_centered_shape() {
        let stft = Stft::new(StftParams {
            window_length: 512,
            hop_length: 128,
            centered: true,
        })
        .unwrap();
        let spec = stft.process(&sine(440.0, 16000, 1600)).unwrap();
        // 1600/128 + 1 frames, 512/2 + 1 bins
        assert_eq!(spec.dim(), (257, 13, 1));
    }

    #[test]
    fn test_plain_shape() {
        let stft = Stft::new(StftParams {
            window_length: 512,
            hop_length: 128,
            centered: false,
        })
        .unwrap();
        let spec = stft.process(&sine(440.0, 16000, 1600)).unwrap();
        assert_eq!(spec.dim(), (257, 9, 1));
    }

    #[test]
    fn test_short_signal_single_frame() {
        let stft = Stft::new(StftParams {
            window_length: 512,
            hop_length: 128,
            centered: false,
        })
        .unwrap();
        let spec = stft.process(&sine(440.0, 16000, 100)).unwrap();
        assert_eq!(spec.dim().1, 1);
    }

    #[test]
    fn test_sine_peak_bin() {
        // 500 Hz at 16 kHz with a 512 window lands on bin 16 exactly
        let stft = Stft::new(StftParams {
            window_length: 512,
            hop_length: 128,
            centered: false,
        })
        .unwrap();
        let spec = stft.process(&sine(500.0, 16000, 2048)).unwrap();
        let mut peak_bin = 0;
        let mut peak = 0.0f32;
        for bin in 0..spec.dim().0 {
            let mag = spec[[bin, 0, 0]].norm();
            if mag > peak {
                peak = mag;
                peak_bin = bin;
            }
        }
        assert_eq!(peak_bin, 16);
    }

    #[test]
    fn test_transform_reuses_attached_stft() {
        let stft = Stft::new(StftParams {
            window_length: 512,
            hop_length: 128,
            centered: true,
        })
        .unwrap();
        let mut signal = sine(440.0, 16000, 1600);
        let attached = Array3::from_elem((257, 13, 1), Complex32::new(1.0, 0.0));
        signal.set_stft(attached.clone());

        let (log, complex) = stft.transform(&signal).unwrap();
        assert_eq!(complex, attached);
        // |1 + 0i| = 1.0 -> 0 dB everywhere
        assert!(log.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_amplitude_to_db() {
        use approx::assert_abs_diff_eq;

        assert_abs_diff_eq!(amplitude_to_db(1.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(amplitude_to_db(10.0), 20.0, epsilon = 1e-5);
        // Floored at the amin floor
        assert_abs_diff_eq!(amplitude_to_db(0.0), -100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 5), 1);
        assert_eq!(reflect_index(-2, 5), 2);
        assert_eq!(reflect_index(0, 5), 0);
        assert_eq!(reflect_index(4, 5), 4);
        assert_eq!(reflect_index(5, 5), 3);
        assert_eq!(reflect_index(6, 5), 2);
    }
}
