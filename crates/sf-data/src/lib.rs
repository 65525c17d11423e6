//! # SepForge Training Example Pipeline
//!
//! Turns raw multi-source recordings into fixed-shape spectrogram-domain
//! training examples for source-separation models:
//! - Target construction (MSA / phase-sensitive masks, source assignments)
//! - Multiplicative per-bin training weights
//! - Balance-aware fixed-length windowing
//! - Disk cache so feature extraction runs once per example
//!
//! ## Architecture
//!
//! `Pipeline` composes a [`Corpus`] (dataset-format seam), the sf-dsp STFT
//! front end, and the feature cache into an indexed `len`/`get` surface.
//! Each `get` is synchronous and independent; parallelism is supplied by the
//! caller (or the opt-in rayon sweep in `populate_all`).

mod bundle;
mod cache;
mod config;
mod corpus;
mod error;
mod pipeline;
mod select;
mod targets;
mod weights;

pub use bundle::{FeatureBundle, Field, Window, whiten};
pub use cache::CacheState;
pub use config::{PipelineConfig, TargetKind, WeightKind};
pub use corpus::{Corpus, FixedMixCorpus, MixingCorpus, RawExample};
pub use error::{DataError, DataResult};
pub use pipeline::Pipeline;
pub use targets::{Targets, construct_targets};
pub use weights::compute_weights;
