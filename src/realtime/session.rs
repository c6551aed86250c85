//! # Realtime Session State
//!
//! State machine for one relayed session. Each session is exclusively owned by
//! the WebSocket actor that created it; the registry only holds a snapshot
//! handle for lifecycle bookkeeping.
//!
//! ## Session Lifecycle:
//! `Init → ConnectingUpstream → Negotiating → Active → Closing → Closed`,
//! with `Error` absorbing from any non-terminal state. A session that was
//! refused outright (no upstream credential) jumps from `Init` to `Closed`.

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use uuid::Uuid;

/// Current state of a realtime relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    /// Client accepted, nothing else has happened yet
    Init,
    /// Dialing the upstream realtime API
    ConnectingUpstream,
    /// Upstream connected; waiting for the session acknowledgment
    Negotiating,
    /// Both forwarding loops running
    Active,
    /// Teardown in progress
    Closing,
    /// Terminal: all handles released, registry entry removed
    Closed,
    /// Absorbing failure state; proceeds to Closing/Closed
    Error,
}

impl RelayState {
    /// Status string used in logs and the registry summary.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Init => "init",
            RelayState::ConnectingUpstream => "connecting_upstream",
            RelayState::Negotiating => "negotiating",
            RelayState::Active => "active",
            RelayState::Closing => "closing",
            RelayState::Closed => "closed",
            RelayState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayState::Closed)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RelayState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            // The forward path of the handshake.
            (RelayState::Init, RelayState::ConnectingUpstream)
            | (RelayState::ConnectingUpstream, RelayState::Negotiating)
            | (RelayState::Negotiating, RelayState::Active) => true,
            // Error absorbs from any non-terminal state.
            (state, RelayState::Error) => *state != RelayState::Error,
            // Teardown can start from anywhere, and closing finishes.
            (state, RelayState::Closing) => *state != RelayState::Closing,
            (_, RelayState::Closed) => true,
            _ => false,
        }
    }
}

/// One relayed session's identity and observable state.
///
/// The session id is a generated identifier, deliberately decoupled from any
/// connection handle's memory identity: it keys the registry and appears in
/// every log line for the session.
#[derive(Debug)]
pub struct RealtimeSession {
    pub id: String,
    state: RwLock<RelayState>,
    pub connected_at: DateTime<Utc>,
}

impl RealtimeSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: RwLock::new(RelayState::Init),
            connected_at: Utc::now(),
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.read().unwrap()
    }

    /// Attempt a guarded state transition.
    ///
    /// Returns whether the transition happened; illegal transitions (including
    /// anything out of `Closed`) leave the state untouched, which is what makes
    /// duplicate teardown a no-op.
    pub fn advance(&self, next: RelayState) -> bool {
        let mut state = self.state.write().unwrap();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

impl Default for RealtimeSession {
    fn default() -> Self {
        Self::new()
    }
}
