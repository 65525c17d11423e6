//! Corpus abstraction
//!
//! The dataset-format seam: a corpus resolves an example index into a
//! mixture, its sources, and their labels. Two on-disk layouts ship here;
//! anything else (metadata-driven corpora, synthetic mixing with gain
//! augmentation, ...) implements the same trait.

use std::path::{Path, PathBuf};

use sf_dsp::Signal;
use sf_file::{AudioData, FileError, read_audio, resample};
use walkdir::WalkDir;

use crate::{DataError, DataResult};

/// One decoded example before feature extraction
#[derive(Debug, Clone)]
pub struct RawExample {
    pub mixture: Signal,
    pub sources: Vec<Signal>,
    pub labels: Vec<String>,
}

/// Maps example indices to raw audio.
///
/// `load` must be deterministic for a given index (same sample rate, same
/// channel layout) so cache entries remain valid across runs.
pub trait Corpus: Send + Sync {
    /// Dataset root folder; namespaces the cache directory
    fn root(&self) -> &Path;

    /// Entry paths, one per example, in a stable order
    fn entries(&self) -> &[PathBuf];

    /// Resolve one index into a raw example
    fn load(&self, index: usize) -> DataResult<RawExample>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Corpus of entry directories holding `mixture.<ext>` plus one audio file
/// per source. The mixture is read from disk as recorded.
pub struct FixedMixCorpus {
    root: PathBuf,
    entries: Vec<PathBuf>,
    sample_rate: u32,
}

impl FixedMixCorpus {
    pub fn open<P: AsRef<Path>>(root: P, sample_rate: u32) -> DataResult<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = scan_entries(&root)?;
        Ok(Self {
            root,
            entries,
            sample_rate,
        })
    }
}

impl Corpus for FixedMixCorpus {
    fn root(&self) -> &Path {
        &self.root
    }

    fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    fn load(&self, index: usize) -> DataResult<RawExample> {
        let dir = self.entries.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let files = audio_files(dir)?;

        let mixture_path = files
            .iter()
            .find(|p| file_stem(p) == "mixture")
            .ok_or_else(|| {
                FileError::NotFound(format!("{}/mixture.*", dir.display()))
            })?;
        let mixture = load_signal(mixture_path, self.sample_rate)?;

        let mut sources = Vec::new();
        let mut labels = Vec::new();
        for path in files.iter().filter(|p| file_stem(p) != "mixture") {
            sources.push(load_signal(path, self.sample_rate)?);
            labels.push(file_stem(path));
        }
        if sources.is_empty() {
            return Err(FileError::InvalidFile(format!(
                "{} has no source files",
                dir.display()
            ))
            .into());
        }

        Ok(RawExample {
            mixture,
            sources,
            labels,
        })
    }
}

/// Corpus of entry directories holding only source files; the mixture is
/// the sample-wise sum of the sources.
pub struct MixingCorpus {
    root: PathBuf,
    entries: Vec<PathBuf>,
    sample_rate: u32,
}

impl MixingCorpus {
    pub fn open<P: AsRef<Path>>(root: P, sample_rate: u32) -> DataResult<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = scan_entries(&root)?;
        Ok(Self {
            root,
            entries,
            sample_rate,
        })
    }
}

impl Corpus for MixingCorpus {
    fn root(&self) -> &Path {
        &self.root
    }

    fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    fn load(&self, index: usize) -> DataResult<RawExample> {
        let dir = self.entries.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let files = audio_files(dir)?;
        if files.is_empty() {
            return Err(FileError::InvalidFile(format!(
                "{} has no source files",
                dir.display()
            ))
            .into());
        }

        let mut sources = Vec::new();
        let mut labels = Vec::new();
        for path in &files {
            sources.push(load_signal(path, self.sample_rate)?);
            labels.push(file_stem(path));
        }
        let mixture = Signal::mix_of(&sources)?;

        Ok(RawExample {
            mixture,
            sources,
            labels,
        })
    }
}

/// Entry directories directly under the root, sorted by name
fn scan_entries(root: &Path) -> DataResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(FileError::NotFound(root.display().to_string()).into());
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DataError::Io(e.into()))?;
        if entry.file_type().is_dir() && !audio_files(entry.path())?.is_empty() {
            entries.push(entry.into_path());
        }
    }
    Ok(entries)
}

/// Audio files directly inside a directory, sorted by name
fn audio_files(dir: &Path) -> DataResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DataError::Io(e.into()))?;
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_audio_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("wav" | "wave" | "flac" | "mp3" | "ogg" | "oga")
    )
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Decode, resample to the pipeline rate, and wrap as a signal
fn load_signal(path: &Path, sample_rate: u32) -> DataResult<Signal> {
    let audio = read_audio(path)?;
    let AudioData {
        channels,
        sample_rate: rate,
    } = resample(audio, sample_rate);
    Ok(Signal::new(channels, rate)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn fixture(dir: &Path, with_mixture: bool) {
        std::fs::create_dir_all(dir).unwrap();
        write_wav(&dir.join("source_a.wav"), &[0.1; 64], 16000);
        write_wav(&dir.join("source_b.wav"), &[0.2; 64], 16000);
        if with_mixture {
            write_wav(&dir.join("mixture.wav"), &[0.3; 64], 16000);
        }
    }

    #[test]
    fn test_fixed_mix_corpus() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir.path().join("take_b"), true);
        fixture(&dir.path().join("take_a"), true);

        let corpus = FixedMixCorpus::open(dir.path(), 16000).unwrap();
        assert_eq!(corpus.len(), 2);
        // Entries are sorted by name
        assert!(corpus.entries()[0].ends_with("take_a"));

        let example = corpus.load(0).unwrap();
        assert_eq!(example.sources.len(), 2);
        assert_eq!(example.labels, vec!["source_a", "source_b"]);
        assert_eq!(example.mixture.num_samples(), 64);
        assert!((example.mixture.channel(0)[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_missing_mixture_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir.path().join("take"), false);

        let corpus = FixedMixCorpus::open(dir.path(), 16000).unwrap();
        let result = corpus.load(0);
        assert!(matches!(
            result,
            Err(DataError::File(FileError::NotFound(_)))
        ));
    }

    #[test]
    fn test_mixing_corpus_sums_sources() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir.path().join("take"), false);

        let corpus = MixingCorpus::open(dir.path(), 16000).unwrap();
        let example = corpus.load(0).unwrap();
        assert_eq!(example.sources.len(), 2);
        assert!((example.mixture.channel(0)[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_load_resamples_to_pipeline_rate() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("take");
        std::fs::create_dir_all(&entry).unwrap();
        write_wav(&entry.join("mixture.wav"), &[0.5; 100], 8000);
        write_wav(&entry.join("voice.wav"), &[0.5; 100], 8000);

        let corpus = FixedMixCorpus::open(dir.path(), 16000).unwrap();
        let example = corpus.load(0).unwrap();
        assert_eq!(example.mixture.sample_rate(), 16000);
        assert_eq!(example.mixture.num_samples(), 200);
    }

    #[test]
    fn test_index_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = FixedMixCorpus::open(dir.path(), 16000).unwrap();
        assert!(matches!(
            corpus.load(0),
            Err(DataError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let result = FixedMixCorpus::open("/nonexistent/corpus", 16000);
        assert!(result.is_err());
    }
}
