//! Audio file reading
//!
//! WAV goes through hound; FLAC/MP3/OGG go through symphonia. Everything is
//! decoded to deinterleaved f32 at the file's native sample rate.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal as _};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{FileError, FileResult};

/// Audio file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

/// Decoded audio data
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Audio samples (deinterleaved, one Vec per channel)
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioData {
    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }
}

/// Read WAV file using hound
pub fn read_wav<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FileError::NotFound(path.display().to_string()));
    }

    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    let sample_rate = spec.sample_rate;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_value)
                .collect()
        }
    };

    // Deinterleave
    let num_frames = samples.len() / num_channels;
    let mut channels = vec![vec![0.0; num_frames]; num_channels];
    for (i, chunk) in samples.chunks_exact(num_channels).enumerate() {
        for (ch, &sample) in chunk.iter().enumerate() {
            channels[ch][i] = sample;
        }
    }

    Ok(AudioData {
        channels,
        sample_rate,
    })
}

/// Write a float WAV file using hound
pub fn write_wav<P: AsRef<Path>>(path: P, data: &AudioData) -> FileResult<()> {
    let spec = hound::WavSpec {
        channels: data.num_channels() as u16,
        sample_rate: data.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for i in 0..data.num_frames() {
        for ch in &data.channels {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Read an audio file (WAV via hound, compressed formats via symphonia)
pub fn read_audio<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    let format = AudioFormat::from_path(path);

    if format == AudioFormat::Wav {
        return read_wav(path);
    }

    let file = File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("No audio track found".to_string()))?;

    let track_id = track.id;
    let num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];

    loop {
        match format_reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => copy_audio_buffer(&decoded, &mut channels),
                    // Skip recoverable decode errors
                    Err(symphonia::core::errors::Error::DecodeError(e)) => {
                        log::debug!("skipping undecodable packet in {}: {e}", path.display());
                        continue;
                    }
                    Err(e) => return Err(FileError::DecodeError(e.to_string())),
                }
            }
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    if channels.iter().all(|c| c.is_empty()) {
        return Err(FileError::InvalidFile(
            "No decodable audio data".to_string(),
        ));
    }

    Ok(AudioData {
        channels,
        sample_rate,
    })
}

/// Copy samples from a symphonia buffer into deinterleaved f32 channels
fn copy_audio_buffer(buffer: &AudioBufferRef, output: &mut [Vec<f32>]) {
    macro_rules! extend {
        ($buf:expr, $convert:expr) => {
            for (ch, out_ch) in output.iter_mut().enumerate() {
                if ch < $buf.spec().channels.count() {
                    out_ch.extend($buf.chan(ch).iter().map($convert));
                }
            }
        };
    }

    match buffer {
        AudioBufferRef::F32(buf) => extend!(buf, |&s| s),
        AudioBufferRef::F64(buf) => extend!(buf, |&s| s as f32),
        AudioBufferRef::S8(buf) => extend!(buf, |&s| s as f32 / 128.0),
        AudioBufferRef::S16(buf) => extend!(buf, |&s| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => extend!(buf, |s| s.0 as f32 / 8388608.0),
        AudioBufferRef::S32(buf) => extend!(buf, |&s| s as f32 / 2147483648.0),
        AudioBufferRef::U8(buf) => extend!(buf, |&s| (s as f32 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => extend!(buf, |&s| (s as f32 - 32768.0) / 32768.0),
        AudioBufferRef::U24(buf) => extend!(buf, |s| (s.0 as f32 - 8388608.0) / 8388608.0),
        AudioBufferRef::U32(buf) => {
            extend!(buf, |&s| (s as f32 - 2147483648.0) / 2147483648.0)
        }
    }
}
