//! Pipeline configuration
//!
//! One immutable, validated settings bundle owned by the pipeline for its
//! lifetime. Nothing here mutates after construction; every component reads
//! the fields it needs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bundle::Field;
use crate::{DataError, DataResult};

/// Target construction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Magnitude spectrum approximation: `min(|mix|, |source|)`
    #[default]
    Msa,
    /// Phase-sensitive approximation: magnitude scaled by the cosine of the
    /// source/mixture phase difference, clamped to `[0, |mix|]`
    Psa,
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Msa => "msa",
            TargetKind::Psa => "psa",
        }
    }
}

/// Multiplicative weighting terms.
///
/// `Magnitude` and `SourceMagnitude` are mutually exclusive; when both are
/// configured, `Magnitude` takes priority and `SourceMagnitude` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightKind {
    /// Mixture-magnitude energy weighting
    Magnitude,
    /// Per-source magnitude weighting, reduced by max across sources
    SourceMagnitude,
    /// Binary near-silence suppression relative to the per-example peak
    Threshold,
    /// Inverse-square-root class-frequency weighting
    Class,
    /// Final `log10(w + 1)` dynamic-range compression
    Log,
}

impl WeightKind {
    pub fn label(&self) -> &'static str {
        match self {
            WeightKind::Magnitude => "magnitude",
            WeightKind::SourceMagnitude => "source_magnitude",
            WeightKind::Threshold => "threshold",
            WeightKind::Class => "class",
            WeightKind::Log => "log",
        }
    }
}

/// Validated pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Decode/resample target in Hz
    pub sample_rate: u32,
    /// STFT window length (FFT size)
    pub window_length: usize,
    /// STFT hop length
    pub hop_length: usize,
    /// Centered (reflect-padded) framing
    pub centered_stft: bool,
    /// Target construction mode
    pub target_kind: TargetKind,
    /// Weighting terms, applied in their fixed order
    pub weight_kinds: Vec<WeightKind>,
    /// Cutoff for the threshold weight term, in dB below the peak
    pub weight_threshold_db: f32,
    /// Emitted window length in frames
    pub target_length: usize,
    /// Channels retained after windowing
    pub num_channels: usize,
    /// Cache directory root; `None` disables the cache
    pub cache_root: Option<PathBuf>,
    /// Fraction in (0, 1] of the corpus to use
    pub fraction_of_dataset: f64,
    /// Allow-list of emitted fields; empty means all
    pub training_keys: Vec<Field>,
    /// Seed for offset selection
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window_length: 512,
            hop_length: 128,
            centered_stft: true,
            target_kind: TargetKind::Msa,
            weight_kinds: Vec::new(),
            weight_threshold_db: -40.0,
            target_length: 400,
            num_channels: 1,
            cache_root: None,
            fraction_of_dataset: 1.0,
            training_keys: Vec::new(),
            seed: 0,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> DataResult<()> {
        if self.sample_rate == 0 {
            return Err(DataError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.window_length == 0 {
            return Err(DataError::InvalidConfig("window_length must be > 0".into()));
        }
        if self.hop_length == 0 || self.hop_length > self.window_length {
            return Err(DataError::InvalidConfig(format!(
                "hop_length must be in 1..={}",
                self.window_length
            )));
        }
        if self.target_length == 0 {
            return Err(DataError::InvalidConfig("target_length must be > 0".into()));
        }
        if self.num_channels == 0 {
            return Err(DataError::InvalidConfig("num_channels must be > 0".into()));
        }
        if !(self.fraction_of_dataset > 0.0 && self.fraction_of_dataset <= 1.0) {
            return Err(DataError::InvalidConfig(
                "fraction_of_dataset must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Whether a field survives the training-key allow-list
    pub fn emits(&self, field: Field) -> bool {
        self.training_keys.is_empty() || self.training_keys.contains(&field)
    }

    /// Joined weight labels used in the cache path ("none" when empty)
    pub fn weight_label(&self) -> String {
        if self.weight_kinds.is_empty() {
            "none".to_string()
        } else {
            self.weight_kinds
                .iter()
                .map(|w| w.label())
                .collect::<Vec<_>>()
                .join("_")
        }
    }

    /// Hex sha256 of the JSON encoding, recorded in cache manifests
    pub fn fingerprint(&self) -> DataResult<String> {
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(hex::encode(hasher.finalize()))
    }
}
