//! # Transcription Module
//!
//! Batch speech-to-text through an upstream transcription service.
//!
//! ## Key Components:
//! - **Client**: the opaque upstream service contract and its OpenAI-compatible
//!   implementation (one multipart call per audio file)
//! - **Pipeline**: the orchestrator that validates, chunks oversized payloads,
//!   runs the per-chunk calls sequentially, and reassembles one transcript
//!
//! Local model inference is explicitly out of scope; everything heavier than
//! slicing audio happens upstream.

pub mod client; // Upstream service contract + OpenAI-compatible backend
pub mod pipeline; // Batch orchestrator

pub use client::{OpenAiTranscriber, SpeechToText};
pub use pipeline::BatchTranscriber;
