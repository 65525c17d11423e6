//! Target construction
//!
//! Builds the mixture magnitude, mask-adjusted per-source magnitudes, and
//! the hard source-assignment mask from the mixture and per-source complex
//! spectrograms. Pure functions of their inputs.

use ndarray::{Array3, Array4};
use num_complex::Complex32;

use crate::config::TargetKind;
use crate::{DataError, DataResult};

/// Constructed training targets for one example
#[derive(Debug, Clone)]
pub struct Targets {
    /// `|mixture|`, shape `[F, T, C]`
    pub magnitude_spectrogram: Array3<f32>,
    /// Mask-adjusted per-source magnitudes, shape `[F, T, C, S]`
    pub source_spectrograms: Array4<f32>,
    /// Hard source assignments, shape `[F, T, C, S]`
    pub assignments: Array4<f32>,
}

/// Build targets from complex spectrograms.
///
/// Per source, the configured mode bounds the source magnitude by the
/// mixture magnitude:
/// - `Msa`: `min(|mix|, |src|)`
/// - `Psa`: `max(0, min(|mix|, |src| * cos(arg(src) - arg(mix))))`
///
/// A bin's assignment marks every source whose magnitude equals the per-bin
/// maximum; exact ties mark all tied sources.
pub fn construct_targets(
    mixture: &Array3<Complex32>,
    sources: &[Array3<Complex32>],
    kind: TargetKind,
) -> DataResult<Targets> {
    if sources.is_empty() {
        return Err(DataError::InvalidConfig(
            "cannot construct targets without sources".into(),
        ));
    }
    let (num_bins, num_frames, num_channels) = mixture.dim();
    for source in sources {
        if source.dim() != mixture.dim() {
            return Err(DataError::ShapeMismatch {
                expected: format!("{:?}", mixture.dim()),
                got: format!("{:?}", source.dim()),
            });
        }
    }

    let magnitude_spectrogram = mixture.mapv(|z| z.norm());
    let num_sources = sources.len();
    let mut source_spectrograms =
        Array4::zeros((num_bins, num_frames, num_channels, num_sources));

    for (s, source) in sources.iter().enumerate() {
        for f in 0..num_bins {
            for t in 0..num_frames {
                for c in 0..num_channels {
                    let mix_mag = magnitude_spectrogram[[f, t, c]];
                    let src = source[[f, t, c]];
                    let value = match kind {
                        TargetKind::Msa => mix_mag.min(src.norm()),
                        TargetKind::Psa => {
                            let phase_diff = src.arg() - mixture[[f, t, c]].arg();
                            mix_mag.min(src.norm() * phase_diff.cos()).max(0.0)
                        }
                    };
                    source_spectrograms[[f, t, c, s]] = value;
                }
            }
        }
    }

    let mut assignments = Array4::zeros((num_bins, num_frames, num_channels, num_sources));
    for f in 0..num_bins {
        for t in 0..num_frames {
            for c in 0..num_channels {
                let mut max = f32::NEG_INFINITY;
                for s in 0..num_sources {
                    max = max.max(source_spectrograms[[f, t, c, s]]);
                }
                for s in 0..num_sources {
                    if source_spectrograms[[f, t, c, s]] == max {
                        assignments[[f, t, c, s]] = 1.0;
                    }
                }
            }
        }
    }

    Ok(Targets {
        magnitude_spectrogram,
        source_spectrograms,
        assignments,
    })
}
