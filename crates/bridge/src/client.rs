//! One live bridge connection: the [`TransportClient`] half and the
//! socket I/O loop behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use sl_protocol::{decode_bytes, encode_bytes, BridgeMessage, LinkEvent, ResponseError};
use sl_sessions::{
    DisconnectReason, Document, PhoneNumber, TransportClient, TransportError, TransportEvent,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub(crate) type BridgeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

type RequestResult = Result<Option<serde_json::Value>, TransportError>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<RequestResult>>>>;

/// Connection tunables handed over by the factory.
#[derive(Debug, Clone)]
pub(crate) struct ConnOptions {
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_message_bytes: usize,
}

/// Outbound half of a bridge connection.
pub struct BridgeClient {
    session_key: String,
    outbound: mpsc::Sender<BridgeMessage>,
    pending: Pending,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl BridgeClient {
    /// Take over a handshaken socket.  `early` holds link events that
    /// arrived before `link_started`; they are delivered first.
    pub(crate) fn spawn(
        session_key: String,
        ws: BridgeSocket,
        early: Vec<LinkEvent>,
        events: mpsc::Sender<TransportEvent>,
        opts: ConnOptions,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<BridgeMessage>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        tokio::spawn(run_io(IoTask {
            session_key: session_key.clone(),
            ws,
            early,
            events,
            outbound: outbound_rx,
            pending: pending.clone(),
            closed: closed.clone(),
            opts: opts.clone(),
        }));

        Self {
            session_key,
            outbound: outbound_tx,
            pending,
            request_timeout: opts.request_timeout,
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn request(&self, request_id: String, msg: BridgeMessage) -> RequestResult {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if self.outbound.send(msg).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!(
                    session_key = %self.session_key,
                    request_id = %request_id,
                    "bridge request timed out"
                );
                Err(TransportError::Timeout)
            }
        }
    }
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl TransportClient for BridgeClient {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String, TransportError> {
        let id = request_id();
        let msg = BridgeMessage::PairingCodeRequest {
            request_id: id.clone(),
            phone: phone.digits().to_string(),
        };
        let result = self.request(id, msg).await?;
        result
            .as_ref()
            .and_then(|v| v.get("code").and_then(|c| c.as_str()).or_else(|| v.as_str()))
            .map(str::to_string)
            .ok_or_else(|| TransportError::Other("bridge returned no pairing code".into()))
    }

    async fn send_document(&self, target: &str, doc: Document) -> Result<(), TransportError> {
        let id = request_id();
        let msg = BridgeMessage::SendDocument {
            request_id: id.clone(),
            target: target.to_string(),
            file_name: doc.file_name,
            mime_type: doc.mime_type,
            caption: doc.caption,
            data: encode_bytes(&doc.bytes),
        };
        self.request(id, msg).await.map(|_| ())
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<(), TransportError> {
        let id = request_id();
        let msg = BridgeMessage::SendText {
            request_id: id.clone(),
            target: target.to_string(),
            text: text.to_string(),
        };
        self.request(id, msg).await.map(|_| ())
    }

    async fn terminate(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.outbound.try_send(BridgeMessage::LinkStop);
        self.closed.cancel();
        tracing::debug!(session_key = %self.session_key, "bridge link stopped");
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket I/O
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct IoTask {
    session_key: String,
    ws: BridgeSocket,
    early: Vec<LinkEvent>,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<BridgeMessage>,
    pending: Pending,
    closed: CancellationToken,
    opts: ConnOptions,
}

async fn run_io(task: IoTask) {
    let IoTask {
        session_key,
        ws,
        early,
        events,
        mut outbound,
        pending,
        closed,
        opts,
    } = task;
    let (mut sink, mut stream) = ws.split();

    for event in early {
        if let Some(ev) = to_transport_event(event) {
            let _ = events.send(ev).await;
        }
    }

    let mut heartbeat = tokio::time::interval(opts.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                // Flush what was queued before the stop (link_stop included).
                while let Ok(msg) = outbound.try_recv() {
                    if write(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(msg) = outbound.recv() => {
                if write(&mut sink, &msg).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let ping = BridgeMessage::Ping { timestamp: Utc::now().timestamp_millis() };
                if write(&mut sink, &ping).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > opts.max_message_bytes {
                        tracing::warn!(
                            session_key = %session_key,
                            bytes = text.len(),
                            max = opts.max_message_bytes,
                            "bridge message exceeds max_message_bytes, dropping"
                        );
                        continue;
                    }
                    let reply = match serde_json::from_str::<BridgeMessage>(&text) {
                        Ok(msg) => handle_inbound(&session_key, msg, &events, &pending).await,
                        Err(e) => {
                            tracing::debug!(session_key = %session_key, error = %e, "failed to parse bridge message");
                            None
                        }
                    };
                    if let Some(reply) = reply {
                        if write(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_key = %session_key, "bridge closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(session_key = %session_key, error = %e, "bridge socket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    closed.cancel();
    for (_, waiter) in pending.lock().drain() {
        let _ = waiter.send(Err(TransportError::Closed));
    }
}

async fn write<S>(sink: &mut S, msg: &BridgeMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize bridge message");
            return Ok(());
        }
    };
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

/// Apply one inbound message.  Returns a reply to send, if any.
async fn handle_inbound(
    session_key: &str,
    msg: BridgeMessage,
    events: &mpsc::Sender<TransportEvent>,
    pending: &Pending,
) -> Option<BridgeMessage> {
    match msg {
        BridgeMessage::LinkEvent { event } => {
            if let Some(ev) = to_transport_event(event) {
                let _ = events.send(ev).await;
            }
            None
        }
        BridgeMessage::Response {
            request_id,
            ok,
            result,
            error,
        } => {
            let Some(waiter) = pending.lock().remove(&request_id) else {
                tracing::debug!(session_key, request_id = %request_id, "response for unknown request");
                return None;
            };
            let outcome = if ok {
                Ok(result)
            } else {
                Err(response_error(error))
            };
            let _ = waiter.send(outcome);
            None
        }
        BridgeMessage::Ping { timestamp } => Some(BridgeMessage::Pong { timestamp }),
        BridgeMessage::Pong { .. } => {
            tracing::trace!(session_key, "received pong");
            None
        }
        other => {
            tracing::debug!(session_key, message = ?other, "ignoring bridge message");
            None
        }
    }
}

fn response_error(error: Option<ResponseError>) -> TransportError {
    match error {
        Some(ResponseError {
            message,
            status_code: Some(code),
        }) => TransportError::from_status_code(code, message),
        Some(ResponseError { message, .. }) => TransportError::Other(message),
        None => TransportError::Other("bridge request failed".into()),
    }
}

pub(crate) fn to_transport_event(event: LinkEvent) -> Option<TransportEvent> {
    let ev = match event {
        LinkEvent::Qr { payload } => TransportEvent::QrIssued(payload),
        LinkEvent::PairingCode { code } => TransportEvent::PairingCodeAvailable(code),
        LinkEvent::Opened { identity } => TransportEvent::Opened { identity },
        LinkEvent::Closed {
            status_code,
            reason,
        } => TransportEvent::Closed(match status_code {
            Some(code) => DisconnectReason::from_status_code(code),
            None => DisconnectReason::StreamError(reason.unwrap_or_else(|| "closed".into())),
        }),
        LinkEvent::Credentials { data } => match decode_bytes(&data) {
            Ok(bytes) => TransportEvent::CredentialsUpdated(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "credential payload is not valid hex, dropping");
                return None;
            }
        },
    };
    Some(ev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_event_maps_status_code() {
        let ev = to_transport_event(LinkEvent::Closed {
            status_code: Some(401),
            reason: None,
        });
        assert_eq!(ev, Some(TransportEvent::Closed(DisconnectReason::LoggedOut)));

        let ev = to_transport_event(LinkEvent::Closed {
            status_code: None,
            reason: Some("stream errored".into()),
        });
        assert_eq!(
            ev,
            Some(TransportEvent::Closed(DisconnectReason::StreamError(
                "stream errored".into()
            )))
        );
    }

    #[test]
    fn credentials_decoded_from_hex() {
        let ev = to_transport_event(LinkEvent::Credentials {
            data: encode_bytes(b"{\"a\":1}"),
        });
        assert_eq!(ev, Some(TransportEvent::CredentialsUpdated(b"{\"a\":1}".to_vec())));
        assert_eq!(
            to_transport_event(LinkEvent::Credentials { data: "xyz".into() }),
            None
        );
    }

    #[test]
    fn response_errors_classified() {
        let err = response_error(Some(ResponseError {
            message: "rate limited".into(),
            status_code: Some(429),
        }));
        assert_eq!(err, TransportError::RateLimited);
        assert_eq!(
            response_error(None),
            TransportError::Other("bridge request failed".into())
        );
    }
}
