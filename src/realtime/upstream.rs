//! # Upstream Realtime Connection
//!
//! Transport plumbing for one session's upstream half: the authenticated
//! WebSocket connect, the one-time negotiation exchange, and the handle the
//! relay actor uses to drive the forwarding task.
//!
//! Negotiation is generic over any tungstenite-message Sink + Stream so the
//! handshake logic can be exercised against scripted sockets.

use crate::error::NegotiationError;
use crate::realtime::messages::{negotiation_signal, NegotiationSignal, SessionConfig};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// The upstream connection type produced by [`connect`].
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Commands accepted by a session's relay task.
#[derive(Debug)]
pub enum Outbound {
    /// Forward one client frame to upstream verbatim
    Forward(String),

    /// Close the upstream socket and end the relay task
    Close,
}

/// Actor-side handle to a running relay task.
///
/// Dropping the handle (or calling [`UpstreamHandle::shutdown`]) ends the
/// task; the task itself closes the upstream socket exactly once on its way
/// out, regardless of which side ended first.
pub struct UpstreamHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl UpstreamHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, task: JoinHandle<()>) -> Self {
        Self { outbound, task }
    }

    /// Queue one frame for the client→upstream loop. Returns false when the
    /// relay task has already ended.
    pub fn forward(&self, text: String) -> bool {
        self.outbound.send(Outbound::Forward(text)).is_ok()
    }

    /// Ask the relay task to close the upstream connection. Idempotent; if the
    /// task is already gone the call falls back to aborting it.
    pub fn shutdown(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            self.task.abort();
        }
    }
}

/// Open the authenticated upstream WebSocket connection.
pub async fn connect(url: &str, api_key: &str) -> Result<UpstreamSocket, NegotiationError> {
    let mut request = url
        .into_client_request()
        .map_err(|err| NegotiationError::Connect(format!("invalid upstream url: {}", err)))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|err| NegotiationError::Connect(format!("invalid credential: {}", err)))?;
    request.headers_mut().insert("Authorization", bearer);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (socket, response) = connect_async(request)
        .await
        .map_err(|err| NegotiationError::Connect(err.to_string()))?;

    debug!("Upstream handshake completed: HTTP {}", response.status());
    Ok(socket)
}

/// Run the one-time negotiation: send the session configuration, then wait
/// (bounded) for the `session.created` acknowledgment.
///
/// Frames other than the acknowledgment are logged and skipped; an explicit
/// upstream error frame rejects the negotiation.
pub async fn negotiate<S>(
    socket: &mut S,
    config: &SessionConfig,
    deadline: Duration,
) -> Result<(), NegotiationError>
where
    S: Sink<WsMessage, Error = WsError> + Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    debug!("Configuring upstream session");
    socket
        .send(WsMessage::Text(config.negotiation_message()))
        .await
        .map_err(|err| {
            NegotiationError::Connect(format!("failed to send session config: {}", err))
        })?;

    match tokio::time::timeout(deadline, await_session_created(socket)).await {
        Ok(result) => result,
        Err(_) => Err(NegotiationError::Timeout),
    }
}

async fn await_session_created<S>(socket: &mut S) -> Result<(), NegotiationError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match negotiation_signal(&text) {
                NegotiationSignal::Created => {
                    info!("Upstream session created");
                    return Ok(());
                }
                NegotiationSignal::Rejected(message) => {
                    return Err(NegotiationError::Rejected(message));
                }
                NegotiationSignal::Other(kind) => {
                    warn!("Unexpected frame during negotiation: {}", kind);
                }
            },
            Ok(WsMessage::Close(_)) => {
                return Err(NegotiationError::Connect(
                    "upstream closed during negotiation".to_string(),
                ));
            }
            Ok(_) => {}
            Err(err) => {
                return Err(NegotiationError::Connect(format!(
                    "upstream receive failed: {}",
                    err
                )));
            }
        }
    }

    Err(NegotiationError::Connect(
        "upstream ended before acknowledging the session".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Scripted upstream socket: yields queued frames, records sends, and can
    /// stall forever to provoke the negotiation timeout.
    struct ScriptedSocket {
        incoming: VecDeque<WsMessage>,
        sent: Vec<WsMessage>,
        stall_when_empty: bool,
    }

    impl ScriptedSocket {
        fn new(incoming: Vec<WsMessage>, stall_when_empty: bool) -> Self {
            Self {
                incoming: incoming.into_iter().collect(),
                sent: Vec::new(),
                stall_when_empty,
            }
        }

        fn text(frame: &str) -> WsMessage {
            WsMessage::Text(frame.to_string())
        }
    }

    impl Stream for ScriptedSocket {
        type Item = Result<WsMessage, WsError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            match this.incoming.pop_front() {
                Some(frame) => Poll::Ready(Some(Ok(frame))),
                None if this.stall_when_empty => Poll::Pending,
                None => Poll::Ready(None),
            }
        }
    }

    impl Sink<WsMessage> for ScriptedSocket {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), WsError> {
            self.get_mut().sent.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    fn deadline() -> Duration {
        Duration::from_millis(100)
    }

    #[tokio::test]
    async fn test_negotiation_succeeds_on_acknowledgment() {
        let mut socket = ScriptedSocket::new(
            vec![ScriptedSocket::text(r#"{"type":"session.created"}"#)],
            false,
        );

        negotiate(&mut socket, &SessionConfig::default(), deadline())
            .await
            .unwrap();

        // Exactly one negotiation frame was sent.
        assert_eq!(socket.sent.len(), 1);
        match &socket.sent[0] {
            WsMessage::Text(text) => assert!(text.contains("session.update")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unrelated_frames_are_skipped_until_the_ack() {
        let mut socket = ScriptedSocket::new(
            vec![
                ScriptedSocket::text(r#"{"type":"rate_limits.updated"}"#),
                ScriptedSocket::text(r#"{"type":"session.created"}"#),
            ],
            false,
        );

        assert!(negotiate(&mut socket, &SessionConfig::default(), deadline())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_explicit_error_rejects_the_negotiation() {
        let mut socket = ScriptedSocket::new(
            vec![ScriptedSocket::text(
                r#"{"type":"error","error":{"message":"invalid model"}}"#,
            )],
            false,
        );

        let err = negotiate(&mut socket, &SessionConfig::default(), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Rejected(msg) if msg == "invalid model"));
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let mut socket = ScriptedSocket::new(vec![], true);

        let err = negotiate(
            &mut socket,
            &SessionConfig::default(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::Timeout));
    }

    #[tokio::test]
    async fn test_upstream_ending_is_a_connect_failure() {
        let mut socket = ScriptedSocket::new(vec![], false);

        let err = negotiate(&mut socket, &SessionConfig::default(), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Connect(_)));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_relay_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let handle = UpstreamHandle::new(tx, task);

        assert!(handle.forward("frame".to_string()));
        handle.shutdown();
    }
}
