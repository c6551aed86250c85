//! # Batch Transcription Handler
//!
//! HTTP surface of the batch pipeline.
//!
//! ## Endpoint: `POST /transcribe`
//!
//! Accepts a multipart form with an `audio` file field and responds with:
//! ```json
//! { "success": true, "text": "..." }
//! { "success": false, "error": "..." }
//! ```
//! Status codes: 200 on success, 400 on validation failure, 413 over the
//! upload ceiling, 503 when the transcription backend is unavailable, 500 on
//! anything unexpected.

use crate::audio::payload::AudioPayload;
use crate::audio::scratch::CleanupPolicy;
use crate::error::{TranscribeError, ValidationKind};
use crate::state::AppState;
use crate::transcription::{BatchTranscriber, OpenAiTranscriber};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Terminal artifact of one batch transcription request. Exactly one of
/// `text`/`error` is populated.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResponse {
    pub fn completed(text: String) -> Self {
        Self {
            success: true,
            text: Some(text),
            error: None,
        }
    }
}

/// `POST /transcribe` handler.
pub async fn transcribe_upload(
    app_state: web::Data<AppState>,
    mut multipart: Multipart,
) -> Result<HttpResponse, TranscribeError> {
    let config = app_state.get_config();
    let payload = read_audio_field(&mut multipart).await?;

    info!(
        "Upload received: {} ({:.2} MiB)",
        payload.filename,
        payload.size() as f64 / (1024.0 * 1024.0)
    );

    let backend = OpenAiTranscriber::from_config(&config.upstream)?;
    let pipeline = BatchTranscriber::new(
        backend,
        config.limits.clone(),
        CleanupPolicy::from(&config.cleanup),
    );

    app_state.record_transcription_request();

    match pipeline.transcribe(&payload).await {
        Ok(text) => {
            info!("Transcription completed ({} chars)", text.len());
            Ok(HttpResponse::Ok().json(TranscriptionResponse::completed(text)))
        }
        Err(err) => {
            warn!("Transcription failed: {}", err);
            app_state.record_transcription_failure();
            Err(err)
        }
    }
}

/// Pull the `audio` file field out of the multipart stream.
///
/// A request without that field (or with an unreadable body) is reported as a
/// missing upload; actual content checks belong to the validator.
async fn read_audio_field(multipart: &mut Multipart) -> Result<AudioPayload, TranscribeError> {
    while let Some(item) = multipart.next().await {
        let mut field = item.map_err(|_| TranscribeError::Validation(ValidationKind::Missing))?;

        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        if disposition.get_name() != Some("audio") {
            continue;
        }

        let filename = disposition
            .get_filename()
            .unwrap_or_default()
            .to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|err| {
                TranscribeError::Internal(format!("failed reading upload: {}", err))
            })?;
            bytes.extend_from_slice(&chunk);
        }

        return Ok(AudioPayload::new(bytes, filename, content_type));
    }

    Err(TranscribeError::Validation(ValidationKind::Missing))
}
