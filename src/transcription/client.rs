//! # Upstream Transcription Service
//!
//! Contract and implementation of the external batch speech-to-text call. The
//! service is opaque beyond its input/output contract: one independently
//! decodable audio file in, one text transcript out. Staying under the
//! service's per-call size ceiling is the caller's job (see the chunk planner).

use crate::config::UpstreamConfig;
use crate::error::TranscribeError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Process-wide HTTP client, initialized once on first use.
///
/// Initialization is idempotent and side-effect-free after the first success;
/// every request shares the same connection pool.
static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Narrow accessor for the shared upstream HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(reqwest::Client::new)
}

/// External batch speech-to-text service.
///
/// The trait seam keeps the batch orchestrator testable against scripted
/// fakes; production uses [`OpenAiTranscriber`].
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one audio file to text. An empty string is a valid result
    /// (silence); failures mean the whole request should abort.
    async fn transcribe_file(
        &self,
        path: &Path,
        format_hint: &str,
    ) -> Result<String, TranscribeError>;
}

/// OpenAI-compatible transcription backend.
pub struct OpenAiTranscriber {
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
        }
    }

    /// Build a backend from configuration, failing when no credential is set.
    pub fn from_config(upstream: &UpstreamConfig) -> Result<Self, TranscribeError> {
        let api_key = upstream
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                TranscribeError::Upstream(
                    "transcription credential is not configured (OPENAI_API_KEY)".to_string(),
                )
            })?;

        Ok(Self::new(
            api_key,
            upstream.base_url.clone(),
            upstream.batch_model.clone(),
        ))
    }
}

#[async_trait]
impl SpeechToText for OpenAiTranscriber {
    async fn transcribe_file(
        &self,
        path: &Path,
        format_hint: &str,
    ) -> Result<String, TranscribeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| TranscribeError::Internal(format!("failed reading audio: {}", err)))?;

        debug!(
            "Sending {:.1} KiB to upstream transcription",
            bytes.len() as f64 / 1024.0
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(format!("audio.{}", format_hint))
            .mime_str(mime_for_extension(format_hint))
            .map_err(|err| TranscribeError::Internal(format!("invalid mime type: {}", err)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "text");

        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );

        let response = http_client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                TranscribeError::Upstream(format!("transcription request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Upstream(format!(
                "transcription service returned {}: {}",
                status, body
            )));
        }

        let text = response.text().await.map_err(|err| {
            TranscribeError::Upstream(format!("failed reading transcription response: {}", err))
        })?;

        Ok(text.trim().to_string())
    }
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        "amr" => "audio/amr",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_backend_requires_credential() {
        let config = AppConfig::default();
        assert!(OpenAiTranscriber::from_config(&config.upstream).is_err());

        let mut configured = config;
        configured.upstream.api_key = Some("sk-test".to_string());
        assert!(OpenAiTranscriber::from_config(&configured.upstream).is_ok());
    }

    #[test]
    fn test_mime_lookup_covers_recognized_formats() {
        for ext in crate::audio::payload::RECOGNIZED_EXTENSIONS {
            assert_ne!(mime_for_extension(ext), "application/octet-stream");
        }
        assert_eq!(mime_for_extension("txt"), "application/octet-stream");
    }

    #[test]
    fn test_http_client_is_shared() {
        let a = http_client() as *const reqwest::Client;
        let b = http_client() as *const reqwest::Client;
        assert_eq!(a, b);
    }
}
