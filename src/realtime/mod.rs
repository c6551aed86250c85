//! # Realtime Relay Module
//!
//! Everything behind the `/realtime` WebSocket endpoint except the actor
//! itself (which lives in `src/websocket.rs`).
//!
//! ## Key Components:
//! - **Messages**: tagged envelopes, the fixed `SessionConfig`, and the small
//!   amount of classification the relay performs
//! - **Upstream**: authenticated connect, one-time negotiation, relay handle
//! - **Session**: per-session state machine with a generated identity
//! - **Registry**: process-wide insert/remove bookkeeping of live sessions
//!
//! ## Relay Protocol:
//! The relay is near-verbatim in both directions. Client frames are parsed
//! only far enough to drop empty audio appends; upstream frames are classified
//! for logging but always forwarded unchanged.

pub mod messages; // Wire envelopes and classification
pub mod registry; // Insert/remove session bookkeeping
pub mod session; // Per-session state machine
pub mod upstream; // Upstream connect, negotiation, relay handle

pub use registry::SessionRegistry;
pub use session::{RealtimeSession, RelayState};
