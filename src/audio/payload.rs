//! # Upload Validation
//!
//! Validates an uploaded audio payload before any processing begins. The checks
//! run in a fixed order and the first failure wins:
//!
//! 1. **Missing**: blank filename (the handler reports a missing part the same way)
//! 2. **Empty**: zero bytes
//! 3. **TooLarge**: over the configured upload ceiling
//! 4. **UnsupportedFormat**: neither content type nor extension is recognized
//!
//! Validation only inspects the payload; it creates no temporary resources and
//! makes no upstream calls.

use crate::config::LimitsConfig;
use crate::error::ValidationKind;

/// Audio formats the upstream transcription service accepts.
pub const RECOGNIZED_EXTENSIONS: [&str; 8] =
    ["mp3", "wav", "ogg", "webm", "m4a", "mp4", "flac", "amr"];

/// A single uploaded audio file, captured verbatim from the multipart request.
///
/// Immutable once received; discarded after the request completes.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: Option<String>,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, filename: String, content_type: Option<String>) -> Self {
        Self {
            bytes,
            filename,
            content_type,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Canonical extension for this payload.
    ///
    /// The declared content type is consulted first; the filename extension is
    /// only a fallback. A payload can therefore be accepted with a misleading
    /// filename as long as the client declared a recognized MIME type.
    pub fn format_hint(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(extension_for_mime)
            .map(str::to_string)
            .or_else(|| filename_extension(&self.filename))
    }

    /// Check the payload against the upload rules.
    pub fn validate(&self, limits: &LimitsConfig) -> Result<(), ValidationKind> {
        if self.filename.trim().is_empty() {
            return Err(ValidationKind::Missing);
        }

        if self.bytes.is_empty() {
            return Err(ValidationKind::Empty);
        }

        if self.size() > limits.max_upload_bytes {
            return Err(ValidationKind::TooLarge {
                size: self.size(),
                limit: limits.max_upload_bytes,
            });
        }

        match self.format_hint() {
            Some(ext) if RECOGNIZED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
            _ => Err(ValidationKind::UnsupportedFormat {
                detail: format!("Use: {}", RECOGNIZED_EXTENSIONS.join(", ")),
            }),
        }
    }
}

/// Map a declared MIME type to a recognized extension.
///
/// Parameters after a `;` (charset, codecs) are ignored.
fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        "audio/webm" | "video/webm" => Some("webm"),
        "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/mp4" | "video/mp4" => Some("mp4"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/amr" => Some("amr"),
        _ => None,
    }
}

fn filename_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_upload_bytes: 1024,
            chunk_ceiling_bytes: 512,
            max_transcript_chars: 10_000,
        }
    }

    fn payload(bytes: &[u8], filename: &str, content_type: Option<&str>) -> AudioPayload {
        AudioPayload::new(
            bytes.to_vec(),
            filename.to_string(),
            content_type.map(str::to_string),
        )
    }

    #[test]
    fn test_accepts_recognized_upload() {
        let upload = payload(b"riff data", "memo.wav", Some("audio/wav"));
        assert!(upload.validate(&limits()).is_ok());
    }

    #[test]
    fn test_blank_filename_is_missing() {
        let upload = payload(b"data", "  ", None);
        assert_eq!(upload.validate(&limits()), Err(ValidationKind::Missing));
    }

    #[test]
    fn test_empty_wins_over_unsupported_format() {
        // An empty file with an unrecognized extension must still report Empty.
        let upload = payload(b"", "notes.txt", Some("text/plain"));
        assert_eq!(upload.validate(&limits()), Err(ValidationKind::Empty));
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        let at_limit = payload(&vec![0u8; 1024], "memo.mp3", None);
        assert!(at_limit.validate(&limits()).is_ok());

        let over_limit = payload(&vec![0u8; 1025], "memo.mp3", None);
        assert!(matches!(
            over_limit.validate(&limits()),
            Err(ValidationKind::TooLarge { size: 1025, limit: 1024 })
        ));
    }

    #[test]
    fn test_content_type_wins_over_filename() {
        // Recognized MIME type rescues an unhelpful filename.
        let upload = payload(b"data", "blob.bin", Some("audio/mpeg"));
        assert!(upload.validate(&limits()).is_ok());
        assert_eq!(upload.format_hint().as_deref(), Some("mp3"));

        // Unknown MIME type falls back to the extension.
        let fallback = payload(b"data", "memo.FLAC", Some("application/octet-stream"));
        assert!(fallback.validate(&limits()).is_ok());
        assert_eq!(fallback.format_hint().as_deref(), Some("flac"));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let upload = payload(b"data", "notes.txt", Some("text/plain"));
        assert!(matches!(
            upload.validate(&limits()),
            Err(ValidationKind::UnsupportedFormat { .. })
        ));

        let no_extension = payload(b"data", "notes", None);
        assert!(matches!(
            no_extension.validate(&limits()),
            Err(ValidationKind::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_mime_parameters_are_ignored() {
        let upload = payload(b"data", "clip", Some("audio/webm; codecs=opus"));
        assert_eq!(upload.format_hint().as_deref(), Some("webm"));
    }
}
