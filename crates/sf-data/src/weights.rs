//! Per-bin training weights
//!
//! Base weights are all ones; each configured term multiplies in, always in
//! the same order regardless of configuration order:
//! magnitude (or source-magnitude), threshold, class, then the final log
//! compression. Division is epsilon-guarded throughout, so silent or empty
//! inputs stay finite.

use ndarray::{Array3, Array4, ArrayView3};

use crate::config::WeightKind;

/// Epsilon guarding energy normalizations
const SUM_EPS: f32 = 1e-6;
/// Epsilon guarding class-frequency division
const CLASS_EPS: f32 = 1e-4;

/// Compute the weight tensor (`[F, T, C]`) for one example.
///
/// `Magnitude` takes priority over `SourceMagnitude` when both are
/// configured; the latter is then ignored.
pub fn compute_weights(
    log_spectrogram: &Array3<f32>,
    magnitude_spectrogram: &Array3<f32>,
    source_spectrograms: &Array4<f32>,
    assignments: &Array4<f32>,
    kinds: &[WeightKind],
    threshold_db: f32,
) -> Array3<f32> {
    let mut weights = Array3::<f32>::ones(magnitude_spectrogram.dim());

    if kinds.contains(&WeightKind::Magnitude) {
        weights *= &magnitude_weights(magnitude_spectrogram.view());
    } else if kinds.contains(&WeightKind::SourceMagnitude) {
        weights *= &source_magnitude_weights(source_spectrograms);
    }
    if kinds.contains(&WeightKind::Threshold) {
        weights *= &threshold_weights(log_spectrogram, threshold_db);
    }
    if kinds.contains(&WeightKind::Class) {
        weights *= &class_weights(assignments);
    }
    if kinds.contains(&WeightKind::Log) {
        weights.mapv_inplace(|w| (w + 1.0).log10());
    }

    weights
}

/// Unit-total-mass energy weighting, rescaled by bin count so a flat
/// spectrogram gets weight just under one everywhere.
fn magnitude_weights(magnitude: ArrayView3<f32>) -> Array3<f32> {
    let total = magnitude.sum();
    let count = magnitude.len() as f32;
    magnitude.mapv(|m| m / (total + SUM_EPS) * count)
}

/// Magnitude weighting per source, reduced by max across sources.
fn source_magnitude_weights(sources: &Array4<f32>) -> Array3<f32> {
    let (num_bins, num_frames, num_channels, num_sources) = sources.dim();
    let mut reduced = Array3::<f32>::zeros((num_bins, num_frames, num_channels));
    for s in 0..num_sources {
        let per_source = magnitude_weights(sources.index_axis(ndarray::Axis(3), s));
        for ((f, t, c), &w) in per_source.indexed_iter() {
            if w > reduced[[f, t, c]] {
                reduced[[f, t, c]] = w;
            }
        }
    }
    reduced
}

/// Binary mask suppressing bins more than `threshold_db` below the peak.
fn threshold_weights(log_spectrogram: &Array3<f32>, threshold_db: f32) -> Array3<f32> {
    let peak = log_spectrogram
        .iter()
        .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    log_spectrogram.mapv(|v| if v - peak > threshold_db { 1.0 } else { 0.0 })
}

/// Inverse-square-root class-frequency weighting: rare classes weigh more.
fn class_weights(assignments: &Array4<f32>) -> Array3<f32> {
    let (num_bins, num_frames, num_channels, num_sources) = assignments.dim();

    let mut class_freq = vec![0.0f32; num_sources];
    for ((_, _, _, s), &a) in assignments.indexed_iter() {
        class_freq[s] += a;
    }
    let total: f32 = class_freq.iter().sum();
    let class_weight: Vec<f32> = class_freq
        .iter()
        .map(|&freq| 1.0 / (freq / (total + SUM_EPS) + CLASS_EPS).sqrt())
        .collect();

    let mut out = Array3::<f32>::zeros((num_bins, num_frames, num_channels));
    for ((f, t, c, s), &a) in assignments.indexed_iter() {
        out[[f, t, c]] += a * class_weight[s];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn flat_inputs(value: f32) -> (Array3<f32>, Array3<f32>, Array4<f32>, Array4<f32>) {
        let log = Array3::zeros((3, 4, 1));
        let magnitude = Array3::from_elem((3, 4, 1), value);
        let sources = Array4::from_elem((3, 4, 1, 2), value);
        let mut assignments = Array4::zeros((3, 4, 1, 2));
        assignments.fill(1.0);
        (log, magnitude, sources, assignments)
    }

    #[test]
    fn test_no_terms_gives_ones() {
        let (log, mag, src, asg) = flat_inputs(0.5);
        let weights = compute_weights(&log, &mag, &src, &asg, &[], -40.0);
        assert!(weights.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_magnitude_flat_is_near_one() {
        use approx::assert_abs_diff_eq;

        let (log, mag, src, asg) = flat_inputs(0.5);
        let weights = compute_weights(&log, &mag, &src, &asg, &[WeightKind::Magnitude], -40.0);
        for &w in weights.iter() {
            assert_abs_diff_eq!(w, 1.0, epsilon = 1e-4);
            assert!(w <= 1.0);
        }
    }

    #[test]
    fn test_magnitude_emphasizes_energy() {
        let (log, mut mag, src, asg) = flat_inputs(0.1);
        mag[[1, 2, 0]] = 10.0;
        let weights = compute_weights(&log, &mag, &src, &asg, &[WeightKind::Magnitude], -40.0);
        assert!(weights[[1, 2, 0]] > weights[[0, 0, 0]]);
        assert!(weights.iter().all(|&w| w.is_finite() && w >= 0.0));
    }

    #[test]
    fn test_magnitude_takes_priority_over_source_magnitude() {
        let (log, mag, mut src, asg) = flat_inputs(0.5);
        src[[0, 0, 0, 0]] = 100.0;

        let both = compute_weights(
            &log,
            &mag,
            &src,
            &asg,
            &[WeightKind::Magnitude, WeightKind::SourceMagnitude],
            -40.0,
        );
        let magnitude_only =
            compute_weights(&log, &mag, &src, &asg, &[WeightKind::Magnitude], -40.0);
        assert_eq!(both, magnitude_only);
    }

    #[test]
    fn test_source_magnitude_takes_max_across_sources() {
        let (log, mag, mut src, asg) = flat_inputs(0.1);
        // Disjoint peaks in the two sources
        src[[0, 0, 0, 0]] = 5.0;
        src[[2, 3, 0, 1]] = 5.0;

        let weights = compute_weights(
            &log,
            &mag,
            &src,
            &asg,
            &[WeightKind::SourceMagnitude],
            -40.0,
        );
        assert!(weights[[0, 0, 0]] > weights[[1, 1, 0]]);
        assert!(weights[[2, 3, 0]] > weights[[1, 1, 0]]);
    }

    #[test]
    fn test_threshold_masks_quiet_bins() {
        let (mut log, mag, src, asg) = flat_inputs(0.5);
        log.fill(-50.0);
        log[[0, 0, 0]] = 0.0;
        log[[1, 0, 0]] = -10.0;

        let weights = compute_weights(&log, &mag, &src, &asg, &[WeightKind::Threshold], -40.0);
        assert_eq!(weights[[0, 0, 0]], 1.0);
        assert_eq!(weights[[1, 0, 0]], 1.0);
        assert_eq!(weights[[2, 2, 0]], 0.0);
    }

    #[test]
    fn test_class_upweights_rare_class() {
        let mut assignments = Array4::<f32>::zeros((2, 10, 1, 2));
        // Source 0 dominates 19 of 20 bins; source 1 gets one
        assignments.fill(0.0);
        for ((_, _, _, s), a) in assignments.indexed_iter_mut() {
            if s == 0 {
                *a = 1.0;
            }
        }
        assignments[[0, 0, 0, 0]] = 0.0;
        assignments[[0, 0, 0, 1]] = 1.0;

        let log = Array3::zeros((2, 10, 1));
        let mag = Array3::from_elem((2, 10, 1), 1.0);
        let src = Array4::from_elem((2, 10, 1, 2), 1.0);

        let weights = compute_weights(&log, &mag, &src, &assignments, &[WeightKind::Class], -40.0);
        // The lone source-1 bin outweighs the source-0 bins
        assert!(weights[[0, 0, 0]] > weights[[1, 5, 0]]);
        assert!(weights.iter().all(|&w| w.is_finite() && w >= 0.0));
    }

    #[test]
    fn test_log_compression_applied_last() {
        let (log, mag, src, asg) = flat_inputs(1e-3);
        let weights = compute_weights(
            &log,
            &mag,
            &src,
            &asg,
            &[WeightKind::Magnitude, WeightKind::Log],
            -40.0,
        );
        // Flat magnitude keeps w < 1, so log10(w + 1) stays below log10(2)
        for &w in weights.iter() {
            assert!(w > 0.3);
            assert!(w < 2.0f32.log10());
        }
    }

    #[test]
    fn test_silent_input_stays_finite() {
        let log = Array3::from_elem((3, 4, 1), -100.0);
        let mag = Array3::zeros((3, 4, 1));
        let src = Array4::zeros((3, 4, 1, 2));
        let asg = Array4::from_elem((3, 4, 1, 2), 1.0);

        let all = [
            WeightKind::Magnitude,
            WeightKind::Threshold,
            WeightKind::Class,
            WeightKind::Log,
        ];
        let weights = compute_weights(&log, &mag, &src, &asg, &all, -40.0);
        assert!(weights.iter().all(|&w| w.is_finite() && w >= 0.0));
    }
}
