//! Fixed-length window selection
//!
//! Pads or crops a full-length feature bundle into fixed-length, time-major
//! windows. Offset choice is balance-aware: candidate offsets are scored by
//! how evenly sources are represented inside the window, the top decile
//! survives, and one survivor is drawn with the caller's RNG.

use ndarray::{Array3, Array4, Axis, s};
use rand::Rng;

use crate::bundle::{FeatureBundle, Field, Window};
use crate::config::PipelineConfig;

/// Crop/pad a bundle into windows. The default path emits exactly one.
pub(crate) fn select_windows<R: Rng>(
    mut bundle: FeatureBundle,
    config: &PipelineConfig,
    rng: &mut R,
) -> Vec<Window> {
    let target_length = config.target_length;

    if bundle.num_frames() < target_length {
        bundle.log_spectrogram = pad_time3(&bundle.log_spectrogram, target_length);
        bundle.magnitude_spectrogram = pad_time3(&bundle.magnitude_spectrogram, target_length);
        bundle.source_spectrograms = pad_time4(&bundle.source_spectrograms, target_length);
        bundle.assignments = pad_time4(&bundle.assignments, target_length);
        bundle.weights = pad_time3(&bundle.weights, target_length);
    }

    let num_frames = bundle.num_frames();
    let offsets = choose_offsets(&bundle.assignments, num_frames, target_length, rng);

    offsets
        .into_iter()
        .map(|offset| materialize(&bundle, offset, config))
        .collect()
}

/// Balance-aware offset choice. Requires `num_frames >= target_length`.
fn choose_offsets<R: Rng>(
    assignments: &Array4<f32>,
    num_frames: usize,
    target_length: usize,
    rng: &mut R,
) -> Vec<usize> {
    let last_valid = num_frames - target_length;

    if assignments.dim().3 == 0 {
        // No sources to balance against: plain uniform draw
        return vec![rng.random_range(0..last_valid.max(1))];
    }

    let mut candidates: Vec<usize> = (0..num_frames).step_by(target_length).collect();
    if let Some(last) = candidates.last_mut() {
        *last = last_valid;
    }

    let scores: Vec<f64> = candidates
        .iter()
        .map(|&offset| balance_score(assignments, offset, target_length))
        .collect();
    let cutoff = percentile(&scores, 90.0);

    let mut kept: Vec<usize> = candidates
        .iter()
        .zip(&scores)
        .filter(|&(_, score)| *score >= cutoff)
        .map(|(&offset, _)| offset.min(last_valid))
        .collect();
    kept.sort_unstable();
    kept.dedup();

    vec![kept[rng.random_range(0..kept.len())]]
}

/// Product over sources of the mean assignment inside the window.
///
/// Maximized when every source occupies an equal share of the window's
/// bins; any absent source zeroes the score.
fn balance_score(assignments: &Array4<f32>, offset: usize, length: usize) -> f64 {
    let window = assignments.slice(s![.., offset..offset + length, .., ..]);
    let (num_bins, num_frames, num_channels, num_sources) = window.dim();
    let count = (num_bins * num_frames * num_channels) as f64;

    let mut score = 1.0f64;
    for s in 0..num_sources {
        let sum = window.index_axis(Axis(3), s).sum() as f64;
        score *= sum / count;
    }
    score
}

/// Linear-interpolation percentile of unsorted values
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
    }
}

fn pad_time3(data: &Array3<f32>, new_frames: usize) -> Array3<f32> {
    let (num_bins, num_frames, num_channels) = data.dim();
    let mut out = Array3::zeros((num_bins, new_frames, num_channels));
    out.slice_mut(s![.., ..num_frames, ..]).assign(data);
    out
}

fn pad_time4(data: &Array4<f32>, new_frames: usize) -> Array4<f32> {
    let (num_bins, num_frames, num_channels, num_sources) = data.dim();
    let mut out = Array4::zeros((num_bins, new_frames, num_channels, num_sources));
    out.slice_mut(s![.., ..num_frames, .., ..]).assign(data);
    out
}

/// Slice one window out of the bundle and move time to the front.
fn materialize(bundle: &FeatureBundle, offset: usize, config: &PipelineConfig) -> Window {
    let length = config.target_length;
    let channels = config.num_channels.min(bundle.log_spectrogram.dim().2);

    let crop3 = |data: &Array3<f32>| {
        data.slice(s![.., offset..offset + length, ..channels])
            .to_owned()
            .permuted_axes([1, 0, 2])
    };
    let crop4 = |data: &Array4<f32>| {
        data.slice(s![.., offset..offset + length, ..channels, ..])
            .to_owned()
            .permuted_axes([1, 0, 2, 3])
    };

    Window {
        log_spectrogram: config
            .emits(Field::LogSpectrogram)
            .then(|| crop3(&bundle.log_spectrogram)),
        magnitude_spectrogram: config
            .emits(Field::MagnitudeSpectrogram)
            .then(|| crop3(&bundle.magnitude_spectrogram)),
        source_spectrograms: config
            .emits(Field::SourceSpectrograms)
            .then(|| crop4(&bundle.source_spectrograms)),
        assignments: config
            .emits(Field::Assignments)
            .then(|| crop4(&bundle.assignments)),
        weights: config.emits(Field::Weights).then(|| crop3(&bundle.weights)),
        labels: bundle.labels.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn bundle(num_bins: usize, num_frames: usize, num_channels: usize, num_sources: usize) -> FeatureBundle {
        FeatureBundle {
            log_spectrogram: Array3::from_elem((num_bins, num_frames, num_channels), 1.0),
            magnitude_spectrogram: Array3::from_elem((num_bins, num_frames, num_channels), 2.0),
            source_spectrograms: Array4::from_elem(
                (num_bins, num_frames, num_channels, num_sources),
                3.0,
            ),
            assignments: Array4::from_elem((num_bins, num_frames, num_channels, num_sources), 1.0),
            weights: Array3::from_elem((num_bins, num_frames, num_channels), 4.0),
            labels: vec!["a".into(), "b".into()],
        }
    }

    fn config(target_length: usize, num_channels: usize) -> PipelineConfig {
        PipelineConfig {
            target_length,
            num_channels,
            ..Default::default()
        }
    }

    #[test]
    fn test_short_input_is_padded() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let windows = select_windows(bundle(3, 5, 1, 2), &config(8, 1), &mut rng);
        assert_eq!(windows.len(), 1);

        let log = windows[0].log_spectrogram.as_ref().unwrap();
        assert_eq!(log.dim(), (8, 3, 1));
        // The padded tail is zero, the original head is not
        assert_eq!(log[[0, 0, 0]], 1.0);
        assert_eq!(log[[7, 0, 0]], 0.0);
    }

    #[test]
    fn test_window_shape_and_channel_truncation() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let windows = select_windows(bundle(3, 20, 2, 2), &config(5, 1), &mut rng);
        let window = &windows[0];

        assert_eq!(window.log_spectrogram.as_ref().unwrap().dim(), (5, 3, 1));
        assert_eq!(
            window.source_spectrograms.as_ref().unwrap().dim(),
            (5, 3, 1, 2)
        );
        assert_eq!(window.labels, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_flat_balance_picks_a_stride_offset() {
        for seed in 0..16 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let windows = select_windows(bundle(3, 20, 1, 2), &config(5, 1), &mut rng);
            let window = &windows[0];
            // All offsets tie, so any of 0, 5, 10, 15 may be drawn; every
            // emitted window still has the exact target length
            assert_eq!(window.num_frames(), Some(5));
        }
    }

    #[test]
    fn test_balanced_region_is_preferred() {
        let mut b = bundle(3, 20, 1, 2);
        // Source 1 appears only in frames 10..15; elsewhere source 0 wins
        b.assignments.fill(0.0);
        for f in 0..3 {
            for t in 0..20 {
                if (10..15).contains(&t) {
                    b.assignments[[f, t, 0, 0]] = 1.0;
                    b.assignments[[f, t, 0, 1]] = 1.0;
                } else {
                    b.assignments[[f, t, 0, 0]] = 1.0;
                }
            }
        }

        // Only the offset-10 window contains source 1, so it is the sole
        // survivor of the percentile filter for every seed
        for seed in 0..8 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let windows = select_windows(b.clone(), &config(5, 1), &mut rng);
            let assignments = windows[0].assignments.as_ref().unwrap();
            assert_eq!(assignments[[0, 0, 0, 1]], 1.0);
        }
    }

    #[test]
    fn test_no_sources_uses_uniform_draw() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let windows = select_windows(bundle(3, 20, 1, 0), &config(5, 1), &mut rng);
        assert_eq!(windows[0].num_frames(), Some(5));
        assert_eq!(windows[0].source_spectrograms.as_ref().unwrap().dim().3, 0);
    }

    #[test]
    fn test_training_keys_restrict_fields() {
        let mut cfg = config(5, 1);
        cfg.training_keys = vec![Field::LogSpectrogram, Field::Weights];

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let windows = select_windows(bundle(3, 20, 1, 2), &cfg, &mut rng);
        let window = &windows[0];

        assert!(window.log_spectrogram.is_some());
        assert!(window.weights.is_some());
        assert!(window.magnitude_spectrogram.is_none());
        assert!(window.assignments.is_none());
        assert!(window.source_spectrograms.is_none());
    }

    #[test]
    fn test_percentile() {
        let values = vec![0.0, 0.0, 0.0, 1.0];
        assert!((percentile(&values, 90.0) - 0.7).abs() < 1e-12);
        assert_eq!(percentile(&values, 100.0), 1.0);
        assert_eq!(percentile(&[5.0], 90.0), 5.0);
    }
}
