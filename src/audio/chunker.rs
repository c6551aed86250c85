//! # Chunk Planning
//!
//! Splits an oversized payload's timeline into sequential, contiguous,
//! non-overlapping chunks sized to respect the upstream per-call ceiling.
//!
//! ## Duration Formula:
//! `chunk_duration = total_duration * (chunk_ceiling / total_file_size)`
//!
//! The scaling is linear in file size, so every chunk lands under the ceiling
//! for (roughly) constant-bitrate audio. The final chunk may be shorter than
//! the computed duration; together the chunks cover `[0, total_duration)`
//! exactly, with no gaps and no overlap.
//!
//! Each chunk is materialized as an independent WAV file so the upstream
//! transcriber never needs to know about the parent file.

use crate::audio::decode::PcmAudio;
use crate::audio::scratch::ScratchStore;
use crate::error::TranscribeError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A contiguous, time-bounded slice of the source timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ChunkSpan {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// A planned chunk materialized on backing storage.
#[derive(Debug)]
pub struct AudioChunk {
    pub index: usize,
    pub span: ChunkSpan,
    pub path: PathBuf,
}

/// Compute the chunk partition of the source timeline.
///
/// Fails with a planning error when the payload is empty or the computed
/// chunk duration degenerates to zero (a payload so dense that one
/// millisecond of it exceeds the ceiling).
pub fn plan_spans(
    total_duration_ms: u64,
    total_bytes: u64,
    chunk_ceiling_bytes: u64,
) -> Result<Vec<ChunkSpan>, TranscribeError> {
    if total_bytes == 0 || total_duration_ms == 0 {
        return Err(TranscribeError::Planning(
            "cannot chunk an empty payload".to_string(),
        ));
    }

    let chunk_duration_ms =
        ((chunk_ceiling_bytes as u128 * total_duration_ms as u128) / total_bytes as u128) as u64;
    if chunk_duration_ms == 0 {
        return Err(TranscribeError::Planning(
            "computed chunk duration is not positive".to_string(),
        ));
    }

    let mut spans = Vec::new();
    let mut start_ms = 0u64;
    while start_ms < total_duration_ms {
        let end_ms = (start_ms + chunk_duration_ms).min(total_duration_ms);
        spans.push(ChunkSpan { start_ms, end_ms });
        start_ms = end_ms;
    }

    info!(
        "Chunking: {:.1}s into {} chunks of {:.1}s",
        total_duration_ms as f64 / 1000.0,
        spans.len(),
        chunk_duration_ms as f64 / 1000.0
    );

    Ok(spans)
}

/// Write each planned span as an independent WAV file in the request's scratch
/// store. Files are adopted by the store as soon as they exist, so a failure
/// partway through still releases everything written so far.
pub fn materialize_chunks(
    pcm: &PcmAudio,
    spans: &[ChunkSpan],
    scratch: &mut ScratchStore,
) -> Result<Vec<AudioChunk>, TranscribeError> {
    let mut chunks = Vec::with_capacity(spans.len());

    for (index, span) in spans.iter().enumerate() {
        let path = scratch.path_for(&format!("chunk-{:03}", index), "wav");
        scratch.adopt(path.clone());

        write_wav_slice(pcm, *span, &path).map_err(|err| {
            TranscribeError::Planning(format!("failed to materialize chunk {}: {}", index, err))
        })?;

        debug!(
            "Chunk {}: {}ms..{}ms ({:.1} KiB)",
            index + 1,
            span.start_ms,
            span.end_ms,
            std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0) as f64 / 1024.0
        );

        chunks.push(AudioChunk {
            index,
            span: *span,
            path,
        });
    }

    Ok(chunks)
}

fn write_wav_slice(pcm: &PcmAudio, span: ChunkSpan, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let start = sample_index(pcm, span.start_ms);
    let end = sample_index(pcm, span.end_ms).min(pcm.samples.len());

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &pcm.samples[start.min(end)..end] {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Index of the first interleaved sample at `ms`, aligned to a frame boundary.
fn sample_index(pcm: &PcmAudio, ms: u64) -> usize {
    let frame = (ms as u128 * pcm.sample_rate as u128 / 1000) as usize;
    frame * pcm.channels as usize
}
