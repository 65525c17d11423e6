//! End-to-end example pipeline
//!
//! Composes corpus loading, the STFT front end, target construction,
//! weighting, whitening, window selection, and the feature cache into an
//! indexed `len`/`get` surface. Every `get` is synchronous and independent;
//! callers supply parallelism by issuing disjoint indices from their own
//! workers (or via the rayon sweep in `populate_all`).

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sf_dsp::{Stft, StftParams};

use crate::bundle::{FeatureBundle, Window, whiten};
use crate::cache::{CacheState, FeatureCache};
use crate::config::PipelineConfig;
use crate::corpus::Corpus;
use crate::select::select_windows;
use crate::targets::construct_targets;
use crate::weights::compute_weights;
use crate::{DataError, DataResult};

pub struct Pipeline<C: Corpus> {
    config: PipelineConfig,
    corpus: C,
    stft: Stft,
    cache: FeatureCache,
    num_examples: usize,
}

impl<C: Corpus> Pipeline<C> {
    pub fn new(corpus: C, config: PipelineConfig) -> DataResult<Self> {
        config.validate()?;
        let stft = Stft::new(StftParams {
            window_length: config.window_length,
            hop_length: config.hop_length,
            centered: config.centered_stft,
        })?;
        let cache = FeatureCache::new(&config, corpus.root())?;

        let mut num_examples = corpus.len();
        if config.fraction_of_dataset < 1.0 {
            num_examples = (num_examples as f64 * config.fraction_of_dataset) as usize;
        }

        Ok(Self {
            config,
            corpus,
            stft,
            cache,
            num_examples,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn corpus(&self) -> &C {
        &self.corpus
    }

    pub fn state(&self) -> CacheState {
        self.cache.state()
    }

    /// Number of usable examples. Once the cache is resident this is the
    /// cached-entry count (all parts of all indices).
    pub fn len(&self) -> usize {
        match self.cache.state() {
            CacheState::Resident => self.cache.num_entries(),
            _ => self.num_examples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One training example.
    ///
    /// Disabled cache: recomputes. Populating: computes, writes every part,
    /// returns part 0. Resident: reads the stored entry; a missing or
    /// corrupt entry is fatal.
    pub fn get(&self, index: usize) -> DataResult<Window> {
        match self.cache.state() {
            CacheState::Disabled => first_window(self.generate(index)?),
            CacheState::Populating => {
                let windows = self.generate(index)?;
                for (part, window) in windows.iter().enumerate() {
                    self.cache.store(index, part, window)?;
                }
                first_window(windows)
            }
            CacheState::Resident => self.cache.load_entry(index),
        }
    }

    /// The full uncached flow for one index, with the pipeline's own
    /// deterministic per-index RNG.
    pub fn generate(&self, index: usize) -> DataResult<Vec<Window>> {
        let mut rng = self.rng_for(index);
        self.generate_with_rng(index, &mut rng)
    }

    /// The full uncached flow with a caller-supplied RNG, for consumers that
    /// reseed per epoch.
    pub fn generate_with_rng<R: Rng>(
        &self,
        index: usize,
        rng: &mut R,
    ) -> DataResult<Vec<Window>> {
        if index >= self.num_examples {
            return Err(DataError::IndexOutOfRange {
                index,
                len: self.num_examples,
            });
        }
        debug!("generating example {index}");
        let example = self.corpus.load(index)?;

        let (mut log_spectrogram, mix_stft) = self.stft.transform(&example.mixture)?;
        let mut source_stfts = Vec::with_capacity(example.sources.len());
        for source in &example.sources {
            let (_, stft) = self.stft.transform(source)?;
            source_stfts.push(stft);
        }

        let targets = construct_targets(&mix_stft, &source_stfts, self.config.target_kind)?;
        let weights = compute_weights(
            &log_spectrogram,
            &targets.magnitude_spectrogram,
            &targets.source_spectrograms,
            &targets.assignments,
            &self.config.weight_kinds,
            self.config.weight_threshold_db,
        );
        whiten(&mut log_spectrogram);

        let bundle = FeatureBundle {
            log_spectrogram,
            magnitude_spectrogram: targets.magnitude_spectrogram,
            source_spectrograms: targets.source_spectrograms,
            assignments: targets.assignments,
            weights,
            labels: example.labels,
        };
        Ok(select_windows(bundle, &self.config, rng))
    }

    /// Compute and cache every usable index. The sweep is rayon-parallel;
    /// the first error wins. Call `mark_resident` afterwards to switch the
    /// cache to reads.
    pub fn populate_all(&self) -> DataResult<()> {
        (0..self.len())
            .into_par_iter()
            .try_for_each(|index| self.get(index).map(|_| ()))
    }

    /// Switch the cache to reads; the index space becomes the cached parts.
    pub fn mark_resident(&mut self) -> DataResult<()> {
        self.cache.mark_resident()
    }

    /// Delete cached entries and return to populating semantics.
    pub fn clear_cache(&mut self) -> DataResult<()> {
        self.cache.clear()
    }

    fn rng_for(&self, index: usize) -> ChaCha8Rng {
        let mixed = splitmix64(self.config.seed.wrapping_add(splitmix64(index as u64)));
        ChaCha8Rng::seed_from_u64(mixed)
    }
}

fn first_window(mut windows: Vec<Window>) -> DataResult<Window> {
    if windows.is_empty() {
        return Err(DataError::InvalidConfig(
            "selection emitted no windows".into(),
        ));
    }
    Ok(windows.swap_remove(0))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
