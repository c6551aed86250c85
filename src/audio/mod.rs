//! # Audio Processing Module
//!
//! Everything the batch pipeline needs to turn an uploaded payload into
//! upstream-sized pieces of audio.
//!
//! ## Key Components:
//! - **Payload Validation**: Presence, size, and format checks before any work
//! - **Decoding**: Multi-format decode to interleaved PCM (chunked path only)
//! - **Chunk Planning**: Time-bounded partition of oversized payloads
//! - **Scratch Storage**: Per-request temp files with guaranteed release
//!
//! The realtime relay never touches this module; it forwards client audio
//! verbatim without decoding it.

pub mod chunker; // Chunk planning and WAV materialization
pub mod decode; // Multi-format decode to PCM
pub mod payload; // Upload validation
pub mod scratch; // Temp-file registry with bounded-retry cleanup
