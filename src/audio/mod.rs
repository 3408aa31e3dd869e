//! Audio asset resolution and decoding.
//!
//! An utterance id is resolved to at most one file in a directory by trying
//! a fixed list of extensions in priority order. Decoding goes through
//! symphonia and always yields mono f32 PCM at the file's native rate;
//! channel layouts beyond mono are averaged down.

pub mod normalize;
pub mod resample;

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EvalError, Result};

/// Extension priority for resolving an id to a file. First hit wins.
pub const EXTENSIONS: [&str; 4] = ["wav", "mp3", "flac", "ogg"];

/// Resolve an utterance id to an audio file in `dir`, or `None`.
pub fn resolve_audio(dir: &Path, id: &str) -> Option<PathBuf> {
    for ext in EXTENSIONS {
        let candidate = dir.join(format!("{id}.{ext}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Decoded mono audio with its native sample rate.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn audio_err(path: &Path, reason: impl ToString) -> EvalError {
    EvalError::Audio {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Decode a whole file to mono f32 PCM at its native sample rate.
pub fn decode_audio(path: &Path) -> Result<MonoAudio> {
    let file = File::open(path).map_err(|e| audio_err(path, e))?;
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
        .map_err(|e| audio_err(path, e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| audio_err(path, "no audio track"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| audio_err(path, "unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| audio_err(path, e))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(audio_err(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // a corrupt packet mid-stream is recoverable, skip it
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(audio_err(path, e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);

        let interleaved = buf.samples();
        match channels {
            0 => return Err(audio_err(path, "no channels")),
            1 => samples.extend_from_slice(interleaved),
            n => {
                for frame in interleaved.chunks_exact(n) {
                    samples.push(frame.iter().sum::<f32>() / n as f32);
                }
            }
        }
    }

    if samples.is_empty() {
        return Err(audio_err(path, "decoded no audio"));
    }

    Ok(MonoAudio {
        samples,
        sample_rate,
    })
}

/// Duration of an audio file in seconds.
///
/// Uses the container's frame count when the header carries one; otherwise
/// falls back to a full decode.
pub fn probe_duration(path: &Path) -> Result<f64> {
    let file = File::open(path).map_err(|e| audio_err(path, e))?;
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
        .map_err(|e| audio_err(path, e))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| audio_err(path, "no audio track"))?;
    let params = &track.codec_params;
    if let (Some(n_frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        return Ok(n_frames as f64 / rate as f64);
    }

    Ok(decode_audio(path)?.duration_secs())
}

/// Write mono f32 samples as 16-bit PCM wav.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| audio_err(path, e))?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * 32767.0) as i16)
            .map_err(|e| audio_err(path, e))?;
    }
    writer.finalize().map_err(|e| audio_err(path, e))?;
    Ok(())
}

/// Read a mono wav file into f32 samples, scaling integer formats.
pub fn read_wav(path: &Path) -> Result<MonoAudio> {
    let mut reader = hound::WavReader::open(path).map_err(|e| audio_err(path, e))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(audio_err(
            path,
            format!("expected mono, got {} channels", spec.channels),
        ));
    }

    let samples = if spec.sample_format == hound::SampleFormat::Float {
        reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| audio_err(path, e))?
    } else {
        let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
        reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 * scale))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| audio_err(path, e))?
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
