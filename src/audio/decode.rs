//! # Audio Decoding
//!
//! Decodes an uploaded audio file into interleaved 16-bit PCM so the chunker
//! can slice it by time. Only the chunked path pays for a full decode; payloads
//! under the per-call ceiling are forwarded to the upstream service untouched.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{info, warn};

/// Fully decoded audio: interleaved 16-bit samples plus the stream parameters
/// needed to re-encode slices of it.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    /// Number of sample frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Total duration of the decoded stream in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frame_count() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Decode an audio file of any supported container/codec into PCM.
///
/// `format_hint` is the payload's extension and helps the probe pick the right
/// demuxer quickly; decoding still works without it.
pub fn decode_file(path: &Path, format_hint: Option<&str>) -> Result<PcmAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file {}", path.display()))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = format_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unrecognized audio container")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .context("no decodable audio track")?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported audio codec")?;

    let mut samples: Vec<i16> = Vec::new();
    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err).context("failed reading audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                }

                let needed = decoded.frames() * spec.channels.count();
                let recreate = sample_buf
                    .as_ref()
                    .map_or(true, |buf| (buf.capacity() as usize) < needed);
                if recreate {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }

                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Decode errors are recoverable: skip the damaged packet.
            Err(SymphoniaError::DecodeError(err)) => {
                warn!("Skipping undecodable packet: {}", err);
            }
            Err(err) => return Err(err).context("failed decoding audio"),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        anyhow::bail!("audio stream contained no samples");
    }

    let pcm = PcmAudio {
        samples,
        sample_rate,
        channels: channels.max(1),
    };

    info!(
        "Audio decoded: {:.1}s, {}Hz, {} channels, {} samples",
        pcm.duration_ms() as f64 / 1000.0,
        pcm.sample_rate,
        pcm.channels,
        pcm.samples.len()
    );

    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..frames * channels as usize {
            writer.write_sample((n % 128) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decodes_wav_and_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1, 8000);

        let pcm = decode_file(&path, Some("wav")).unwrap();
        assert_eq!(pcm.sample_rate, 8000);
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.frame_count(), 8000);
        assert_eq!(pcm.duration_ms(), 1000);
    }

    #[test]
    fn test_stereo_duration_counts_frames_not_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_test_wav(&path, 16000, 2, 4000);

        let pcm = decode_file(&path, Some("wav")).unwrap();
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.samples.len(), 8000);
        assert_eq!(pcm.duration_ms(), 250);
    }

    #[test]
    fn test_undecodable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio").unwrap();

        assert!(decode_file(&path, Some("wav")).is_err());
    }
}
