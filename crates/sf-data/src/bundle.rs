//! Feature bundle and emitted window types

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

/// Fields an emitted window can carry.
///
/// Names double as the stable identifiers used by the training-key
/// allow-list and the cache serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    LogSpectrogram,
    MagnitudeSpectrogram,
    SourceSpectrograms,
    Assignments,
    Weights,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::LogSpectrogram,
        Field::MagnitudeSpectrogram,
        Field::SourceSpectrograms,
        Field::Assignments,
        Field::Weights,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::LogSpectrogram => "log_spectrogram",
            Field::MagnitudeSpectrogram => "magnitude_spectrogram",
            Field::SourceSpectrograms => "source_spectrograms",
            Field::Assignments => "assignments",
            Field::Weights => "weights",
        }
    }

    pub(crate) fn id(&self) -> u8 {
        match self {
            Field::LogSpectrogram => 0,
            Field::MagnitudeSpectrogram => 1,
            Field::SourceSpectrograms => 2,
            Field::Assignments => 3,
            Field::Weights => 4,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.id() == id)
    }
}

/// Full-length features for one example, frequency-major.
///
/// Shapes: `[F, T, C]` for the spectrogram-like tensors and `[F, T, C, S]`
/// for the per-source tensors, where `S` is the source count of this
/// example.
///
/// Invariant: at every `(f, t, c)` the assignment tensor marks every source
/// whose magnitude equals the per-bin maximum, so the per-bin sum is at
/// least one and ties yield multiple marks.
#[derive(Debug, Clone)]
pub struct FeatureBundle {
    pub log_spectrogram: Array3<f32>,
    pub magnitude_spectrogram: Array3<f32>,
    pub source_spectrograms: Array4<f32>,
    pub assignments: Array4<f32>,
    pub weights: Array3<f32>,
    pub labels: Vec<String>,
}

impl FeatureBundle {
    /// Time axis length
    pub fn num_frames(&self) -> usize {
        self.log_spectrogram.dim().1
    }

    /// Source count
    pub fn num_sources(&self) -> usize {
        self.source_spectrograms.dim().3
    }
}

/// One fixed-length training example, time-major.
///
/// Shapes: `[T', F, C]` / `[T', F, C, S]` with `T'` equal to the configured
/// target length and the channel axis truncated to the configured count.
/// Fields excluded by the training-key allow-list are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    pub log_spectrogram: Option<Array3<f32>>,
    pub magnitude_spectrogram: Option<Array3<f32>>,
    pub source_spectrograms: Option<Array4<f32>>,
    pub assignments: Option<Array4<f32>>,
    pub weights: Option<Array3<f32>>,
    pub labels: Vec<String>,
}

impl Window {
    /// Fields present in this window
    pub fn fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.has(*f))
            .collect()
    }

    /// Whether a field is present
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::LogSpectrogram => self.log_spectrogram.is_some(),
            Field::MagnitudeSpectrogram => self.magnitude_spectrogram.is_some(),
            Field::SourceSpectrograms => self.source_spectrograms.is_some(),
            Field::Assignments => self.assignments.is_some(),
            Field::Weights => self.weights.is_some(),
        }
    }

    /// Time axis length of the first present field, if any
    pub fn num_frames(&self) -> Option<usize> {
        if let Some(x) = &self.log_spectrogram {
            return Some(x.dim().0);
        }
        if let Some(x) = &self.magnitude_spectrogram {
            return Some(x.dim().0);
        }
        if let Some(x) = &self.source_spectrograms {
            return Some(x.dim().0);
        }
        if let Some(x) = &self.assignments {
            return Some(x.dim().0);
        }
        self.weights.as_ref().map(|x| x.dim().0)
    }
}

/// Normalize a tensor to zero mean and unit standard deviation.
///
/// The divisor carries a small additive epsilon so silent input stays
/// finite (and all-zero).
pub fn whiten(data: &mut Array3<f32>) {
    let count = data.len();
    if count == 0 {
        return;
    }
    let mean = data.sum() / count as f32;
    data.mapv_inplace(|v| v - mean);
    let variance = data.iter().map(|&v| v * v).sum::<f32>() / count as f32;
    let std = variance.sqrt() + 1e-7;
    data.mapv_inplace(|v| v / std);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_whiten_mean_and_std() {
        let mut data = Array3::from_shape_fn((5, 7, 2), |(f, t, c)| {
            (f as f32) * 3.1 - (t as f32) * 0.7 + (c as f32) * 11.0
        });
        whiten(&mut data);

        let n = data.len() as f32;
        let mean = data.sum() / n;
        let std = (data.iter().map(|&v| v * v).sum::<f32>() / n).sqrt();
        assert!(mean.abs() < 1e-5);
        assert!((std - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_whiten_silence_stays_finite() {
        let mut data = Array3::<f32>::zeros((3, 4, 1));
        whiten(&mut data);
        assert!(data.iter().all(|v| v.is_finite()));
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_field_ids_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_id(field.id()), Some(field));
        }
        assert_eq!(Field::from_id(200), None);
    }

    #[test]
    fn test_window_fields() {
        let window = Window {
            weights: Some(Array3::zeros((4, 3, 1))),
            ..Default::default()
        };
        assert_eq!(window.fields(), vec![Field::Weights]);
        assert_eq!(window.num_frames(), Some(4));
        assert!(!window.has(Field::Assignments));
    }
}
