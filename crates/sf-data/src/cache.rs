//! Feature cache
//!
//! Persists windows as one file per `(index, part)` under
//! `<root>/<sanitized corpus path>/<target>/<weights>/`. Entries use a
//! versioned little-endian layout (magic, version, labels, per-field
//! id/shape/payload) and are written to a temp file then atomically renamed,
//! so readers never observe a partial entry.
//!
//! States: `Disabled` (no root configured) -> every get recomputes;
//! `Populating` -> misses compute and write; `Resident` -> reads only, a
//! missing or corrupt entry is fatal.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

use crate::bundle::{Field, Window};
use crate::config::PipelineConfig;
use crate::{DataError, DataResult};

const MAGIC: &[u8; 4] = b"SFWD";
const FORMAT_VERSION: u32 = 1;
/// Upper bound on decoded tensor elements; anything larger is corruption
const MAX_TENSOR_ELEMENTS: u64 = 1 << 31;

/// Cache lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No cache directory configured; every get recomputes
    Disabled,
    /// Misses compute the example and write it
    Populating,
    /// The index space is the set of cached entries; reads only
    Resident,
}

#[derive(Serialize, Deserialize)]
struct CacheManifest {
    version: u32,
    fingerprint: String,
}

pub(crate) struct FeatureCache {
    dir: Option<PathBuf>,
    fingerprint: String,
    state: CacheState,
    entries: Vec<PathBuf>,
}

impl FeatureCache {
    pub fn new(config: &PipelineConfig, corpus_root: &Path) -> DataResult<Self> {
        let fingerprint = config.fingerprint()?;
        let dir = match &config.cache_root {
            None => None,
            Some(root) => {
                let dir = root
                    .join(sanitize_path(corpus_root))
                    .join(config.target_kind.label())
                    .join(config.weight_label());
                prepare_dir(&dir, &fingerprint)?;
                info!("caching to {}", dir.display());
                Some(dir)
            }
        };
        let state = if dir.is_some() {
            CacheState::Populating
        } else {
            CacheState::Disabled
        };
        Ok(Self {
            dir,
            fingerprint,
            state,
            entries: Vec::new(),
        })
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Number of enumerated entries (meaningful once resident)
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Write one window part. A temp file is renamed into place so a
    /// concurrent reader sees either nothing or the whole entry.
    pub fn store(&self, index: usize, part: usize, window: &Window) -> DataResult<()> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            DataError::InvalidConfig("cannot store into a disabled cache".into())
        })?;
        let tmp_path = dir.join(format!(".tmp-{index:08}-{part}"));
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            write_window(&mut writer, window)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, dir.join(format!("{index:08}.part{part}")))?;
        debug!("cached example {index} part {part}");
        Ok(())
    }

    /// Read the `index`-th enumerated entry (resident state).
    pub fn load_entry(&self, index: usize) -> DataResult<Window> {
        let path = self
            .entries
            .get(index)
            .ok_or(DataError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        read_window(path)
    }

    /// Switch to reads: the cached part files become the index space.
    pub fn mark_resident(&mut self) -> DataResult<()> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            DataError::InvalidConfig("cannot mark a disabled cache resident".into())
        })?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().contains(".part") {
                entries.push(entry.path());
            }
        }
        entries.sort();
        info!("cache resident with {} entries", entries.len());
        self.entries = entries;
        self.state = CacheState::Resident;
        Ok(())
    }

    /// Delete the cache directory and return to populating semantics.
    /// Idempotent when the directory is already absent; a no-op when
    /// disabled.
    pub fn clear(&mut self) -> DataResult<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!("cleared cache {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.entries.clear();
        self.state = CacheState::Populating;
        prepare_dir(&dir, &self.fingerprint)?;
        Ok(())
    }
}

/// Create the cache directory and write/verify its manifest.
fn prepare_dir(dir: &Path, fingerprint: &str) -> DataResult<()> {
    fs::create_dir_all(dir)?;
    let manifest_path = dir.join("manifest.json");
    if manifest_path.exists() {
        let manifest: CacheManifest = serde_json::from_reader(BufReader::new(
            File::open(&manifest_path)?,
        ))
        .map_err(|e| DataError::CacheCorrupt {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?;
        if manifest.fingerprint != fingerprint {
            return Err(DataError::InvalidConfig(format!(
                "cache at {} was built with different settings; clear it first",
                dir.display()
            )));
        }
    } else {
        let manifest = CacheManifest {
            version: FORMAT_VERSION,
            fingerprint: fingerprint.to_string(),
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(&manifest_path)?), &manifest)?;
    }
    Ok(())
}

/// Corpus path with separators flattened, usable as one directory name
fn sanitize_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

fn write_window<W: Write>(writer: &mut W, window: &Window) -> DataResult<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;

    writer.write_all(&(window.labels.len() as u32).to_le_bytes())?;
    for label in &window.labels {
        let bytes = label.as_bytes();
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(bytes)?;
    }

    let fields = window.fields();
    writer.write_all(&[fields.len() as u8])?;
    for field in fields {
        // `Window::fields` only lists present fields
        match field {
            Field::LogSpectrogram => {
                if let Some(a) = &window.log_spectrogram {
                    put_tensor(writer, field, a.shape(), a.iter())?;
                }
            }
            Field::MagnitudeSpectrogram => {
                if let Some(a) = &window.magnitude_spectrogram {
                    put_tensor(writer, field, a.shape(), a.iter())?;
                }
            }
            Field::SourceSpectrograms => {
                if let Some(a) = &window.source_spectrograms {
                    put_tensor(writer, field, a.shape(), a.iter())?;
                }
            }
            Field::Assignments => {
                if let Some(a) = &window.assignments {
                    put_tensor(writer, field, a.shape(), a.iter())?;
                }
            }
            Field::Weights => {
                if let Some(a) = &window.weights {
                    put_tensor(writer, field, a.shape(), a.iter())?;
                }
            }
        }
    }
    Ok(())
}

fn put_tensor<'a, W: Write>(
    writer: &mut W,
    field: Field,
    shape: &[usize],
    values: impl Iterator<Item = &'a f32>,
) -> DataResult<()> {
    writer.write_all(&[field.id()])?;
    writer.write_all(&[shape.len() as u8])?;
    for &dim in shape {
        writer.write_all(&(dim as u64).to_le_bytes())?;
    }
    for &value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Deserialize one cached window. Any structural problem is reported as
/// corruption; in the resident state the caller treats that as fatal.
pub(crate) fn read_window(path: &Path) -> DataResult<Window> {
    let file = File::open(path).map_err(|e| corrupt(path, e.to_string()))?;
    let mut decoder = Decoder {
        reader: BufReader::new(file),
        path,
    };
    decoder.decode()
}

fn corrupt(path: &Path, reason: impl Into<String>) -> DataError {
    DataError::CacheCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

struct Decoder<'a, R: Read> {
    reader: R,
    path: &'a Path,
}

impl<R: Read> Decoder<'_, R> {
    fn decode(&mut self) -> DataResult<Window> {
        let mut magic = [0u8; 4];
        self.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt(self.path, "bad magic"));
        }
        let version = self.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(corrupt(
                self.path,
                format!("format version {version}, expected {FORMAT_VERSION}"),
            ));
        }

        let num_labels = self.read_u32()? as usize;
        let mut labels = Vec::with_capacity(num_labels.min(256));
        for _ in 0..num_labels {
            let len = self.read_u32()? as usize;
            let mut bytes = vec![0u8; len];
            self.read_exact(&mut bytes)?;
            labels.push(
                String::from_utf8(bytes).map_err(|_| corrupt(self.path, "label not UTF-8"))?,
            );
        }

        let mut window = Window {
            labels,
            ..Default::default()
        };

        let mut field_count = [0u8; 1];
        self.read_exact(&mut field_count)?;
        for _ in 0..field_count[0] {
            self.read_field(&mut window)?;
        }
        Ok(window)
    }

    fn read_field(&mut self, window: &mut Window) -> DataResult<()> {
        let mut header = [0u8; 2];
        self.read_exact(&mut header)?;
        let field = Field::from_id(header[0])
            .ok_or_else(|| corrupt(self.path, format!("unknown field id {}", header[0])))?;
        let ndim = header[1] as usize;

        let expected_ndim = match field {
            Field::SourceSpectrograms | Field::Assignments => 4,
            _ => 3,
        };
        if ndim != expected_ndim {
            return Err(corrupt(
                self.path,
                format!("{} has {} dims, expected {}", field.name(), ndim, expected_ndim),
            ));
        }

        let mut dims = Vec::with_capacity(ndim);
        let mut count: u64 = 1;
        for _ in 0..ndim {
            let dim = self.read_u64()?;
            count = count.saturating_mul(dim.max(1));
            dims.push(dim as usize);
        }
        if count > MAX_TENSOR_ELEMENTS {
            return Err(corrupt(self.path, "implausible tensor size"));
        }

        let len: usize = dims.iter().product();
        let mut values = Vec::with_capacity(len);
        let mut bytes = [0u8; 4];
        for _ in 0..len {
            self.read_exact(&mut bytes)?;
            values.push(f32::from_le_bytes(bytes));
        }

        match field {
            Field::LogSpectrogram => {
                window.log_spectrogram = Some(self.shape3(&dims, values)?);
            }
            Field::MagnitudeSpectrogram => {
                window.magnitude_spectrogram = Some(self.shape3(&dims, values)?);
            }
            Field::SourceSpectrograms => {
                window.source_spectrograms = Some(self.shape4(&dims, values)?);
            }
            Field::Assignments => {
                window.assignments = Some(self.shape4(&dims, values)?);
            }
            Field::Weights => {
                window.weights = Some(self.shape3(&dims, values)?);
            }
        }
        Ok(())
    }

    fn shape3(&self, dims: &[usize], values: Vec<f32>) -> DataResult<Array3<f32>> {
        Array3::from_shape_vec((dims[0], dims[1], dims[2]), values)
            .map_err(|e| corrupt(self.path, e.to_string()))
    }

    fn shape4(&self, dims: &[usize], values: Vec<f32>) -> DataResult<Array4<f32>> {
        Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), values)
            .map_err(|e| corrupt(self.path, e.to_string()))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> DataResult<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| corrupt(self.path, e.to_string()))
    }

    fn read_u32(&mut self) -> DataResult<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self) -> DataResult<u64> {
        let mut bytes = [0u8; 8];
        self.read_exact(&mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}
