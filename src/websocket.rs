//! # Realtime Relay WebSocket Handler
//!
//! Bridges one client WebSocket connection to one upstream realtime session.
//! Clients connect to `/realtime` and exchange the upstream API's tagged JSON
//! frames; the relay stays out of the conversation except to negotiate the
//! session and to guard a handful of known-bad frames.
//!
//! ## Session Flow:
//! 1. **Accept**: the session is registered and, when a credential exists, the
//!    upstream connect starts in a background task
//! 2. **Negotiate**: one `session.update` is sent; the session becomes active
//!    on the upstream acknowledgment (bounded wait)
//! 3. **Active**: two forwarding loops run until either side closes: the actor
//!    mailbox carries client→upstream frames, the relay task carries
//!    upstream→client frames
//! 4. **Teardown**: whichever loop ends first cancels its sibling; the
//!    upstream socket is closed exactly once and the registry entry removed.
//!    Duplicate teardown is a no-op.
//!
//! Typed error frames (`config-missing`, `negotiation-timeout`,
//! `negotiation-rejected`, `upstream-closed`, `forward-error`) are sent to the
//! client best-effort before the connection drops.

use crate::config::AppConfig;
use crate::error::{NegotiationError, RelayErrorCode};
use crate::realtime::messages::{
    classify_upstream_message, client_error_message, inspect_client_message, ClientDirective,
    SessionConfig, UpstreamEvent,
};
use crate::realtime::registry::SessionRegistry;
use crate::realtime::session::{RealtimeSession, RelayState};
use crate::realtime::upstream::{self, Outbound, UpstreamHandle, UpstreamSocket};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// WebSocket actor owning one relayed session.
pub struct RealtimeRelay {
    /// This connection's session; also registered in the registry
    session: Arc<RealtimeSession>,

    /// Process-wide lifecycle bookkeeping
    registry: Arc<SessionRegistry>,

    /// Application configuration snapshot taken at accept time
    config: AppConfig,

    /// Handle to the running relay task, present once the session is active
    upstream: Option<UpstreamHandle>,

    /// Client frames received while the handshake is still in flight
    pending: Vec<String>,

    /// Teardown guard; makes a duplicate close a no-op
    closed: bool,
}

impl RealtimeRelay {
    pub fn new(app_state: &AppState) -> Self {
        Self {
            session: Arc::new(RealtimeSession::new()),
            registry: app_state.registry.clone(),
            config: app_state.get_config(),
            upstream: None,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Send a typed error frame to the client, best effort. The client may
    /// already be gone; actix swallows the transport failure in that case.
    fn send_relay_error(
        &self,
        ctx: &mut ws::WebsocketContext<Self>,
        code: RelayErrorCode,
        message: &str,
    ) {
        ctx.text(client_error_message(code, message));
        warn!(
            session_id = %self.session.id,
            "Relay error [{}]: {}",
            code.as_str(),
            message
        );
    }

    /// Run one client frame through the guard and hand it to the relay task.
    fn forward_client_message(&self, text: &str) {
        match inspect_client_message(text) {
            ClientDirective::Forward => {
                if let Some(handle) = &self.upstream {
                    if !handle.forward(text.to_string()) {
                        warn!(
                            session_id = %self.session.id,
                            "Relay task already ended; dropping client frame"
                        );
                    }
                }
            }
            ClientDirective::DropEmptyAudio => {
                warn!(
                    session_id = %self.session.id,
                    "Skipping empty audio buffer from client"
                );
            }
            ClientDirective::DropInvalid => {
                warn!(
                    session_id = %self.session.id,
                    "Invalid JSON from client; frame dropped"
                );
            }
        }
    }

    /// Idempotent teardown: cancel the relay task (which closes the upstream
    /// socket exactly once), deregister, and mark the session closed.
    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.session.advance(RelayState::Closing);

        if let Some(handle) = self.upstream.take() {
            handle.shutdown();
        }

        let removed = self.registry.remove(&self.session.id);
        self.session.advance(RelayState::Closed);

        if removed {
            let lifetime = chrono::Utc::now().signed_duration_since(self.session.connected_at);
            info!(
                session_id = %self.session.id,
                "Realtime session cleaned up after {:.1}s",
                lifetime.num_milliseconds() as f64 / 1000.0
            );
        }
    }
}

/// Message delivering the negotiated upstream socket to the actor.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamReady {
    socket: UpstreamSocket,
}

/// One upstream frame to forward to the client verbatim.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamText(String);

/// The relay task ended on its own (upstream closure or forwarding fault).
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamGone {
    code: RelayErrorCode,
    message: String,
}

/// Connecting or negotiating the upstream session failed.
#[derive(Message)]
#[rtype(result = "()")]
struct RelayFault {
    code: RelayErrorCode,
    message: String,
}

impl Actor for RealtimeRelay {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id, "Realtime client connected");
        self.registry.insert(self.session.clone());

        // Credential absence is a per-connection condition: refuse this
        // session and keep the process serving.
        let Some(api_key) = self
            .config
            .upstream
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
        else {
            let err = NegotiationError::MissingCredential;
            error!(session_id = %self.session.id, "{}", err);
            self.send_relay_error(ctx, err.client_code(), &err.to_string());
            self.session.advance(RelayState::Closed);
            ctx.stop();
            return;
        };

        self.session.advance(RelayState::ConnectingUpstream);

        let addr = ctx.address();
        let session = self.session.clone();
        let url = self.config.upstream.realtime_url.clone();
        let deadline = Duration::from_secs(self.config.upstream.negotiation_timeout_secs);

        tokio::spawn(async move {
            let mut socket = match upstream::connect(&url, &api_key).await {
                Ok(socket) => socket,
                Err(err) => {
                    addr.do_send(RelayFault {
                        code: err.client_code(),
                        message: err.to_string(),
                    });
                    return;
                }
            };

            session.advance(RelayState::Negotiating);
            info!(session_id = %session.id, "Connected to upstream realtime API");

            if let Err(err) =
                upstream::negotiate(&mut socket, &SessionConfig::default(), deadline).await
            {
                addr.do_send(RelayFault {
                    code: err.client_code(),
                    message: err.to_string(),
                });
                let _ = socket.close(None).await;
                return;
            }

            addr.do_send(UpstreamReady { socket });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.teardown();
    }
}

/// Client→upstream half of the relay.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RealtimeRelay {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if self.upstream.is_some() {
                    self.forward_client_message(&text);
                } else if !self.closed {
                    // The handshake is still in flight; hold the frame and
                    // replay it (through the guard) once the session is active.
                    debug!(
                        session_id = %self.session.id,
                        "Buffering client frame until the session is active"
                    );
                    self.pending.push(text.to_string());
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(
                    session_id = %self.session.id,
                    "Ignoring binary frame from client (relay protocol is JSON text)"
                );
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id, "Client disconnected: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(
                    session_id = %self.session.id,
                    "Unexpected continuation frame from client"
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<UpstreamReady> for RealtimeRelay {
    type Result = ();

    fn handle(&mut self, msg: UpstreamReady, ctx: &mut Self::Context) {
        if self.closed {
            // The client left during the handshake; the socket is dropped and
            // closed by the runtime.
            return;
        }

        let handle = spawn_relay(msg.socket, ctx.address(), self.session.id.clone());
        self.upstream = Some(handle);
        self.session.advance(RelayState::Active);
        info!(session_id = %self.session.id, "Realtime relay active");

        for text in std::mem::take(&mut self.pending) {
            self.forward_client_message(&text);
        }
    }
}

impl Handler<UpstreamText> for RealtimeRelay {
    type Result = ();

    fn handle(&mut self, msg: UpstreamText, ctx: &mut Self::Context) {
        // Upstream output is never filtered, only forwarded.
        ctx.text(msg.0);
    }
}

impl Handler<UpstreamGone> for RealtimeRelay {
    type Result = ();

    fn handle(&mut self, msg: UpstreamGone, ctx: &mut Self::Context) {
        if self.closed {
            return;
        }
        if msg.code == RelayErrorCode::ForwardError {
            self.session.advance(RelayState::Error);
        }
        self.send_relay_error(ctx, msg.code, &msg.message);
        ctx.stop();
    }
}

impl Handler<RelayFault> for RealtimeRelay {
    type Result = ();

    fn handle(&mut self, msg: RelayFault, ctx: &mut Self::Context) {
        if self.closed {
            return;
        }
        self.session.advance(RelayState::Error);
        self.send_relay_error(ctx, msg.code, &msg.message);
        ctx.stop();
    }
}

/// Start the upstream→client forwarding loop for a negotiated socket.
///
/// The returned handle feeds the client→upstream direction. Both directions
/// live in one `select!` loop, so whichever side ends first implicitly cancels
/// the other; the socket is reunited and closed at the single exit point.
fn spawn_relay(
    socket: UpstreamSocket,
    addr: Addr<RealtimeRelay>,
    session_id: String,
) -> UpstreamHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let task = tokio::spawn(async move {
        let (mut sink, mut stream) = socket.split();
        let mut fault: Option<(RelayErrorCode, String)> = None;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Outbound::Forward(text)) => {
                        if let Err(err) = sink.send(WsMessage::Text(text)).await {
                            warn!(session_id = %session_id, "Forward to upstream failed: {}", err);
                            fault = Some((
                                RelayErrorCode::ForwardError,
                                format!("failed to forward to upstream: {}", err),
                            ));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        log_upstream_event(&session_id, &text);
                        addr.do_send(UpstreamText(text));
                    }
                    Some(Ok(WsMessage::Close(reason))) => {
                        info!(session_id = %session_id, "Upstream connection closed: {:?}", reason);
                        fault = Some((
                            RelayErrorCode::UpstreamClosed,
                            "upstream connection closed".to_string(),
                        ));
                        break;
                    }
                    // Control frames carry nothing to relay.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(session_id = %session_id, "Upstream receive failed: {}", err);
                        fault = Some((
                            RelayErrorCode::ForwardError,
                            format!("upstream receive failed: {}", err),
                        ));
                        break;
                    }
                    None => {
                        fault = Some((
                            RelayErrorCode::UpstreamClosed,
                            "upstream stream ended".to_string(),
                        ));
                        break;
                    }
                },
            }
        }

        // Single exit point: close the upstream socket exactly once.
        if let Ok(mut socket) = sink.reunite(stream) {
            let _ = socket.close(None).await;
        }

        if let Some((code, message)) = fault {
            addr.do_send(UpstreamGone { code, message });
        }
    });

    UpstreamHandle::new(tx, task)
}

/// Classify one upstream frame for the logs. Classification never affects
/// forwarding.
fn log_upstream_event(session_id: &str, text: &str) {
    match classify_upstream_message(text) {
        UpstreamEvent::Lifecycle(kind) => {
            info!(session_id = %session_id, "Upstream event: {}", kind);
        }
        UpstreamEvent::SpeechBoundary(kind) => {
            debug!(session_id = %session_id, "Speech event: {}", kind);
        }
        UpstreamEvent::Error { code, message } => {
            error!(session_id = %session_id, "Upstream error [{}]: {}", code, message);
        }
        UpstreamEvent::Other(_) => {}
    }
}

/// WebSocket endpoint handler.
///
/// Handles the initial HTTP request and upgrades it to a WebSocket connection;
/// the session itself is driven by the [`RealtimeRelay`] actor.
pub async fn realtime_endpoint(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New realtime connection request from {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(RealtimeRelay::new(&app_state), &req, stream)
}
