//! # Batch Transcription Pipeline
//!
//! Orchestrates one upload from validation to final transcript.
//!
//! ## Process:
//! 1. Validate the payload (no temp resources exist yet on failure)
//! 2. Materialize the payload to a scratch file
//! 3. Under the per-call ceiling: one upstream call on the whole file
//! 4. Over it: decode, plan chunks, transcribe each chunk **sequentially**,
//!    skipping empty fragments; any chunk failure aborts the whole request
//! 5. Join fragments with single spaces, in chunk-timeline order
//! 6. Release every scratch file, success or failure
//! 7. Truncate the transcript at the response ceiling
//!
//! Chunks are transcribed one at a time: upstream rate limits and the ordering
//! of partial results rule out concurrency here. The fail-fast policy on a
//! chunk failure is deliberate; a partial transcript is never returned.

use crate::audio::chunker::{materialize_chunks, plan_spans};
use crate::audio::decode::decode_file;
use crate::audio::payload::AudioPayload;
use crate::audio::scratch::{CleanupPolicy, ScratchStore};
use crate::config::LimitsConfig;
use crate::error::{truncate_with_marker, TranscribeError};
use crate::transcription::client::SpeechToText;
use std::path::PathBuf;
use tracing::{debug, info};

/// Batch orchestrator: validates, chunks when needed, and reassembles a single
/// transcript through an upstream [`SpeechToText`] backend.
pub struct BatchTranscriber<S> {
    backend: S,
    limits: LimitsConfig,
    cleanup: CleanupPolicy,
    scratch_root: PathBuf,
}

impl<S: SpeechToText> BatchTranscriber<S> {
    pub fn new(backend: S, limits: LimitsConfig, cleanup: CleanupPolicy) -> Self {
        Self {
            backend,
            limits,
            cleanup,
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Override where scratch files are written.
    pub fn with_scratch_root(mut self, root: PathBuf) -> Self {
        self.scratch_root = root;
        self
    }

    /// Transcribe one uploaded payload to text.
    ///
    /// Every temporary file created along the way is released before this
    /// returns, on every path.
    pub async fn transcribe(&self, payload: &AudioPayload) -> Result<String, TranscribeError> {
        // Validation short-circuits before any temp resource or upstream call.
        payload
            .validate(&self.limits)
            .map_err(TranscribeError::Validation)?;

        info!(
            "Transcribing {} ({:.2} MiB)",
            payload.filename,
            payload.size() as f64 / (1024.0 * 1024.0)
        );

        let mut scratch = ScratchStore::new(self.scratch_root.clone(), self.cleanup.clone());
        let result = self.run(payload, &mut scratch).await;
        scratch.release_all().await;

        let text = result?;
        Ok(truncate_with_marker(text, self.limits.max_transcript_chars))
    }

    async fn run(
        &self,
        payload: &AudioPayload,
        scratch: &mut ScratchStore,
    ) -> Result<String, TranscribeError> {
        // validate() guaranteed a recognized format; "wav" is an unreachable fallback.
        let hint = payload.format_hint().unwrap_or_else(|| "wav".to_string());

        let source = scratch
            .materialize("source", &hint, &payload.bytes)
            .map_err(|err| {
                TranscribeError::Internal(format!("failed to materialize upload: {}", err))
            })?;

        if payload.size() <= self.limits.chunk_ceiling_bytes {
            debug!("Payload under per-call ceiling, transcribing directly");
            return self.backend.transcribe_file(&source, &hint).await;
        }

        info!(
            "Chunking required (payload over {:.1} MiB per-call ceiling)",
            self.limits.chunk_ceiling_bytes as f64 / (1024.0 * 1024.0)
        );

        let pcm = decode_file(&source, Some(&hint)).map_err(|err| {
            TranscribeError::Planning(format!("failed to decode audio: {}", err))
        })?;

        let spans = plan_spans(
            pcm.duration_ms(),
            payload.size(),
            self.limits.chunk_ceiling_bytes,
        )?;
        let chunks = materialize_chunks(&pcm, &spans, scratch)?;

        let mut fragments: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            debug!(
                "Processing chunk {}/{} ({}ms..{}ms)",
                chunk.index + 1,
                chunks.len(),
                chunk.span.start_ms,
                chunk.span.end_ms
            );
            // Sequential by design; a failure here aborts the whole request.
            let fragment = self.backend.transcribe_file(&chunk.path, "wav").await?;
            if fragment.is_empty() {
                debug!("Chunk {} produced no text, skipping", chunk.index + 1);
                continue;
            }
            fragments.push(fragment);
        }

        info!("Transcribed {} chunks", chunks.len());
        Ok(fragments.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Backend fake that pops scripted results; once the script is exhausted
    /// it keeps answering with an empty fragment. Clones share the script and
    /// call counter so a test can inspect the backend after handing it to the
    /// pipeline.
    #[derive(Clone)]
    struct ScriptedBackend {
        script: Arc<Mutex<VecDeque<Result<String, String>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, String>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into_iter().collect())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechToText for ScriptedBackend {
        async fn transcribe_file(
            &self,
            path: &Path,
            _format_hint: &str,
        ) -> Result<String, TranscribeError> {
            assert!(path.exists(), "backend called with a missing file");
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(err)) => Err(TranscribeError::Upstream(err)),
                None => Ok(String::new()),
            }
        }
    }

    fn limits(max_upload: u64, ceiling: u64) -> LimitsConfig {
        LimitsConfig {
            max_upload_bytes: max_upload,
            chunk_ceiling_bytes: ceiling,
            max_transcript_chars: 10_000,
        }
    }

    fn cleanup() -> CleanupPolicy {
        CleanupPolicy::from(&CleanupConfig {
            max_attempts: 3,
            retry_backoff_ms: 1,
        })
    }

    /// One second of 8kHz mono audio rendered as a WAV payload.
    fn wav_payload() -> AudioPayload {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for n in 0..8000 {
                writer.write_sample((n % 128) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioPayload::new(
            cursor.into_inner(),
            "speech.wav".to_string(),
            Some("audio/wav".to_string()),
        )
    }

    fn scratch_file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_small_payload_makes_exactly_one_upstream_call() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("hello there".to_string())]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, 1 << 20), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let payload = AudioPayload::new(
            b"fits in one call".to_vec(),
            "memo.mp3".to_string(),
            Some("audio/mpeg".to_string()),
        );
        let text = pipeline.transcribe(&payload).await.unwrap();

        assert_eq!(text, "hello there");
        assert_eq!(backend.calls(), 1);
        assert_eq!(scratch_file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_chunked_and_joined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let payload = wav_payload();
        // Two chunks: ceiling at two thirds of the payload size.
        let ceiling = payload.size() * 2 / 3;
        let backend = ScriptedBackend::new(vec![
            Ok("hello".to_string()),
            Ok("world".to_string()),
        ]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, ceiling), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let text = pipeline.transcribe(&payload).await.unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(backend.calls(), 2);
        assert_eq!(scratch_file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_fragments_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let payload = wav_payload();
        // Three chunks: ceiling at two fifths of the payload size.
        let ceiling = payload.size() * 2 / 5;
        let backend = ScriptedBackend::new(vec![
            Ok("hello".to_string()),
            Ok(String::new()),
            Ok("world".to_string()),
        ]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, ceiling), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let text = pipeline.transcribe(&payload).await.unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_without_partial_text() {
        let dir = tempfile::tempdir().unwrap();
        let payload = wav_payload();
        let ceiling = payload.size() * 2 / 3;
        let backend = ScriptedBackend::new(vec![
            Ok("hello".to_string()),
            Err("rate limited".to_string()),
        ]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, ceiling), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let err = pipeline.transcribe(&payload).await.unwrap_err();

        assert!(matches!(err, TranscribeError::Upstream(_)));
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(backend.calls(), 2);
        // Cleanup ran even though the request failed.
        assert_eq!(scratch_file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, 1 << 19), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let payload = AudioPayload::new(Vec::new(), "empty.wav".to_string(), None);
        let err = pipeline.transcribe(&payload).await.unwrap_err();

        assert!(matches!(
            err,
            TranscribeError::Validation(crate::error::ValidationKind::Empty)
        ));
        assert_eq!(backend.calls(), 0);
        // No temp resources were ever created.
        assert_eq!(scratch_file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_transcript_is_truncated_at_the_response_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("hello world".to_string())]);
        let mut limits = limits(1 << 20, 1 << 20);
        limits.max_transcript_chars = 5;
        let pipeline = BatchTranscriber::new(backend.clone(), limits, cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        let payload = AudioPayload::new(
            b"tiny".to_vec(),
            "memo.wav".to_string(),
            Some("audio/wav".to_string()),
        );
        let text = pipeline.transcribe(&payload).await.unwrap();

        assert!(text.starts_with("hello"));
        assert!(text.ends_with(crate::error::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_undecodable_oversized_payload_is_a_planning_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![]);
        let pipeline = BatchTranscriber::new(backend.clone(), limits(1 << 20, 8), cleanup())
            .with_scratch_root(dir.path().to_path_buf());

        // Over the 8-byte ceiling but not decodable audio.
        let payload = AudioPayload::new(
            b"not really audio data".to_vec(),
            "memo.wav".to_string(),
            Some("audio/wav".to_string()),
        );
        let err = pipeline.transcribe(&payload).await.unwrap_err();

        assert!(matches!(err, TranscribeError::Planning(_)));
        assert_eq!(backend.calls(), 0);
        assert_eq!(scratch_file_count(dir.path()), 0);
    }
}
