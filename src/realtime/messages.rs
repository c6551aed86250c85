//! # Realtime Wire Messages
//!
//! The tagged JSON envelopes exchanged over a realtime session, plus the small
//! amount of inspection the relay performs on them. The relay never rewrites a
//! message: it either forwards a frame verbatim or drops it.

use crate::error::RelayErrorCode;
use serde::Serialize;
use serde_json::{json, Value};

/// Immutable negotiation payload sent exactly once per session to the upstream
/// realtime API. Fixed for the system; not user-configurable per message.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionModel,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub max_response_output_tokens: u32,
}

/// Transcription sub-model applied to the caller's audio.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionModel {
    pub model: String,
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: "You are a helpful assistant. Be concise and natural in your responses."
                .to_string(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionModel {
                model: "gpt-4o-mini-transcribe".to_string(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
            },
            temperature: 0.7,
            max_response_output_tokens: 4096,
        }
    }
}

#[derive(Serialize)]
struct SessionUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    session: &'a SessionConfig,
}

impl SessionConfig {
    /// The one-time `session.update` negotiation frame.
    pub fn negotiation_message(&self) -> String {
        serde_json::to_string(&SessionUpdate {
            kind: "session.update",
            session: self,
        })
        .unwrap_or_default()
    }
}

/// What the relay should do with one client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientDirective {
    /// Forward the frame to upstream verbatim
    Forward,

    /// Audio-append event with a zero-length audio field; upstream rejects
    /// undersized buffers, so the frame is dropped with a warning
    DropEmptyAudio,

    /// Not parseable as a tagged envelope; dropped with a warning
    DropInvalid,
}

/// Inspect a client frame without rewriting it.
pub fn inspect_client_message(text: &str) -> ClientDirective {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return ClientDirective::DropInvalid,
    };

    if value.get("type").and_then(Value::as_str) == Some("input_audio_buffer.append") {
        let audio = value.get("audio").and_then(Value::as_str).unwrap_or("");
        if audio.is_empty() {
            return ClientDirective::DropEmptyAudio;
        }
    }

    ClientDirective::Forward
}

/// Classification of an upstream frame, for observability only. Every frame is
/// forwarded to the client regardless of its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Session lifecycle events (created, updated, conversation items)
    Lifecycle(String),

    /// Speech boundary events from server-side voice activity detection
    SpeechBoundary(String),

    /// Upstream reported an error mid-session
    Error { code: String, message: String },

    /// Anything else, including frames without a recognizable tag
    Other(Option<String>),
}

pub fn classify_upstream_message(text: &str) -> UpstreamEvent {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return UpstreamEvent::Other(None),
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return UpstreamEvent::Other(None),
    };

    match kind.as_str() {
        "session.created" | "session.updated" | "conversation.item.created" => {
            UpstreamEvent::Lifecycle(kind)
        }
        "input_audio_buffer.speech_started" | "input_audio_buffer.speech_stopped" => {
            UpstreamEvent::SpeechBoundary(kind)
        }
        "error" => {
            let error = value.get("error").cloned().unwrap_or(Value::Null);
            UpstreamEvent::Error {
                code: error
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
            }
        }
        _ => UpstreamEvent::Other(Some(kind)),
    }
}

/// Outcome of one upstream frame received while negotiating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationSignal {
    /// The session was acknowledged
    Created,

    /// Upstream explicitly rejected the negotiation
    Rejected(String),

    /// Some other frame; logged, negotiation keeps waiting
    Other(String),
}

pub fn negotiation_signal(text: &str) -> NegotiationSignal {
    match classify_upstream_message(text) {
        UpstreamEvent::Lifecycle(kind) if kind == "session.created" => NegotiationSignal::Created,
        UpstreamEvent::Error { message, .. } => NegotiationSignal::Rejected(message),
        UpstreamEvent::Lifecycle(kind) | UpstreamEvent::SpeechBoundary(kind) => {
            NegotiationSignal::Other(kind)
        }
        UpstreamEvent::Other(kind) => {
            NegotiationSignal::Other(kind.unwrap_or_else(|| "untagged".to_string()))
        }
    }
}

/// Typed error frame sent to the client before teardown.
pub fn client_error_message(code: RelayErrorCode, message: &str) -> String {
    json!({
        "type": "error",
        "error": {
            "code": code.as_str(),
            "message": message,
        }
    })
    .to_string()
}
