//! # Error Handling
//!
//! This module defines the error taxonomy for both pipelines and how batch
//! errors are converted to HTTP responses.
//!
//! ## Error Categories:
//! - **ValidationKind**: upload refused before any processing (400 / 413)
//! - **TranscribeError**: batch pipeline failures (validation, chunk planning,
//!   upstream call, unexpected)
//! - **NegotiationError**: realtime handshake failures, reported to the client
//!   as typed messages before teardown
//! - **RelayErrorCode**: the wire-level codes a realtime client can receive
//!
//! Validation and planning errors short-circuit before any upstream call or
//! temporary resource is created. Cleanup failures are warnings only and never
//! appear here.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Ceiling on error detail surfaced to HTTP clients, in characters.
pub const ERROR_DETAIL_CEILING: usize = 500;

/// Marker appended whenever a transcript or error message is cut at a ceiling.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Bound `text` to `ceiling` characters, appending the truncation marker when
/// anything was cut.
pub fn truncate_with_marker(text: String, ceiling: usize) -> String {
    if text.chars().count() <= ceiling {
        return text;
    }
    let mut bounded: String = text.chars().take(ceiling).collect();
    bounded.push_str(TRUNCATION_MARKER);
    bounded
}

/// Why an uploaded payload was refused before any processing began.
///
/// The checks run in a fixed order (missing, empty, too large, format), so an
/// empty file with an unrecognized extension is still reported as `Empty`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    /// No file part was present, or the declared filename was blank
    Missing,

    /// The payload contained zero bytes
    Empty,

    /// The payload exceeded the configured upload ceiling
    TooLarge { size: u64, limit: u64 },

    /// Neither the declared content type nor the filename extension matched a
    /// recognized audio format
    UnsupportedFormat { detail: String },
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationKind::Missing => write!(f, "No audio file provided"),
            ValidationKind::Empty => write!(f, "Empty file"),
            ValidationKind::TooLarge { size, limit } => write!(
                f,
                "File too large: {} bytes (maximum: {} bytes)",
                size, limit
            ),
            ValidationKind::UnsupportedFormat { detail } => {
                write!(f, "Unsupported format. {}", detail)
            }
        }
    }
}

/// Errors surfaced by the batch transcription pipeline.
#[derive(Debug)]
pub enum TranscribeError {
    /// Upload refused by the validator; no upstream call was made
    Validation(ValidationKind),

    /// Chunking math degenerated (empty payload, undecodable audio, or a
    /// non-positive computed chunk duration)
    Planning(String),

    /// The upstream transcription call failed or the service was unreachable
    Upstream(String),

    /// Unexpected fault that crossed a component boundary opaquely
    Internal(String),
}

impl fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscribeError::Validation(kind) => write!(f, "{}", kind),
            TranscribeError::Planning(msg) => write!(f, "Error chunking audio: {}", msg),
            TranscribeError::Upstream(msg) => write!(f, "Transcription error: {}", msg),
            TranscribeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Conversion of batch pipeline errors into HTTP responses.
///
/// ## Status Code Mapping:
/// - Validation → 400 (413 for the size ceiling)
/// - Upstream → 503 (the transcription backend is unavailable or failing)
/// - Planning / Internal → 500
///
/// The body always carries the `{success, error}` shape the transcription
/// endpoint promises, with the error detail bounded to
/// [`ERROR_DETAIL_CEILING`] characters.
impl ResponseError for TranscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            TranscribeError::Validation(ValidationKind::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            TranscribeError::Validation(_) => StatusCode::BAD_REQUEST,
            TranscribeError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            TranscribeError::Planning(_) | TranscribeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": truncate_with_marker(self.to_string(), ERROR_DETAIL_CEILING),
        }))
    }
}

/// Failures establishing a realtime session with the upstream speech API.
#[derive(Debug)]
pub enum NegotiationError {
    /// The upstream credential was never configured for this process
    MissingCredential,

    /// No acknowledgment arrived within the bounded negotiation wait
    Timeout,

    /// Upstream answered the negotiation with an explicit error message
    Rejected(String),

    /// The upstream connection could not be established or dropped before the
    /// handshake completed
    Connect(String),
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::MissingCredential => write!(
                f,
                "Upstream API key not configured. Set the OPENAI_API_KEY environment variable."
            ),
            NegotiationError::Timeout => {
                write!(f, "Timeout waiting for upstream session creation")
            }
            NegotiationError::Rejected(msg) => write!(f, "Session creation failed: {}", msg),
            NegotiationError::Connect(msg) => {
                write!(f, "Failed to reach upstream realtime API: {}", msg)
            }
        }
    }
}

impl NegotiationError {
    /// The typed code reported to the client for this failure.
    pub fn client_code(&self) -> RelayErrorCode {
        match self {
            NegotiationError::MissingCredential => RelayErrorCode::ConfigMissing,
            NegotiationError::Timeout => RelayErrorCode::NegotiationTimeout,
            NegotiationError::Rejected(_) => RelayErrorCode::NegotiationRejected,
            // The connection is gone from the client's perspective; there is no
            // dedicated code for a handshake that never reached negotiation.
            NegotiationError::Connect(_) => RelayErrorCode::UpstreamClosed,
        }
    }
}

/// Typed error codes a realtime client can receive before teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorCode {
    ConfigMissing,
    NegotiationTimeout,
    NegotiationRejected,
    UpstreamClosed,
    ForwardError,
}

impl RelayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayErrorCode::ConfigMissing => "config-missing",
            RelayErrorCode::NegotiationTimeout => "negotiation-timeout",
            RelayErrorCode::NegotiationRejected => "negotiation-rejected",
            RelayErrorCode::UpstreamClosed => "upstream-closed",
            RelayErrorCode::ForwardError => "forward-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let too_large = TranscribeError::Validation(ValidationKind::TooLarge {
            size: 30,
            limit: 25,
        });
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let empty = TranscribeError::Validation(ValidationKind::Empty);
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

        let upstream = TranscribeError::Upstream("connection refused".to_string());
        assert_eq!(upstream.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let planning = TranscribeError::Planning("zero duration".to_string());
        assert_eq!(planning.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_truncation_appends_marker_only_when_cut() {
        let short = truncate_with_marker("hello".to_string(), 10);
        assert_eq!(short, "hello");

        let long = truncate_with_marker("a".repeat(600), 500);
        assert_eq!(long.chars().count(), 500 + TRUNCATION_MARKER.chars().count());
        assert!(long.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_validation_ordering_is_reflected_in_messages() {
        let kind = ValidationKind::Empty;
        assert_eq!(kind.to_string(), "Empty file");
    }

    #[test]
    fn test_relay_error_codes() {
        assert_eq!(RelayErrorCode::ConfigMissing.as_str(), "config-missing");
        assert_eq!(
            NegotiationError::Timeout.client_code(),
            RelayErrorCode::NegotiationTimeout
        );
        assert_eq!(
            NegotiationError::Rejected("bad model".to_string()).client_code(),
            RelayErrorCode::NegotiationRejected
        );
        assert_eq!(
            NegotiationError::Connect("dns".to_string()).client_code(),
            RelayErrorCode::UpstreamClosed
        );
    }
}
