//! [`TransportFactory`] that opens one bridge connection per linking attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use sl_protocol::{encode_bytes, BridgeMessage, LinkEvent, PROTOCOL_VERSION};
use sl_sessions::{SessionKey, StartRequest, StartedTransport, TransportError, TransportFactory};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{BridgeClient, BridgeSocket, ConnOptions};

/// Events buffered per connection before the session drains them.
const EVENT_CAPACITY: usize = 64;

/// A fully-configured bridge transport.
///
/// Create via [`BridgeTransportBuilder`](crate::builder::BridgeTransportBuilder).
pub struct BridgeTransportFactory {
    pub(crate) bridge_url: String,
    pub(crate) token: Option<String>,
    pub(crate) device_name: String,
    pub(crate) request_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_message_bytes: usize,
}

impl BridgeTransportFactory {
    pub fn builder() -> crate::builder::BridgeTransportBuilder {
        crate::builder::BridgeTransportBuilder::new()
    }

    pub fn bridge_url(&self) -> &str {
        &self.bridge_url
    }

    /// Build the connection URL with auth params.
    fn build_url(&self, key: &SessionKey) -> String {
        let base = &self.bridge_url;
        let sep = if base.contains('?') { "&" } else { "?" };
        match &self.token {
            Some(token) => format!("{base}{sep}token={token}&session_key={key}"),
            None => format!("{base}{sep}session_key={key}"),
        }
    }

    /// Connect, send `link_start`, and wait for the bridge's verdict.
    async fn connect_and_link(
        &self,
        req: &StartRequest,
    ) -> Result<(BridgeSocket, bool, Vec<LinkEvent>), TransportError> {
        let url = self.build_url(&req.key);
        tracing::debug!(session_key = %req.key, bridge = %self.bridge_url, "connecting to bridge");

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let start = BridgeMessage::LinkStart {
            protocol_version: PROTOCOL_VERSION,
            session_key: req.key.to_string(),
            method: req.method.as_str().to_string(),
            phone: req.phone.as_ref().map(|p| p.digits().to_string()),
            credential: req.credential.as_deref().map(encode_bytes),
            device_name: self.device_name.clone(),
        };
        let json = serde_json::to_string(&start).map_err(|e| TransportError::Other(e.to_string()))?;
        ws.send(Message::Text(json))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let mut early = Vec::new();
        while let Some(frame) = ws.next().await {
            let text = match frame.map_err(|e| TransportError::Io(e.to_string()))? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(TransportError::Closed),
                _ => continue,
            };
            match serde_json::from_str::<BridgeMessage>(&text) {
                Ok(BridgeMessage::LinkStarted {
                    protocol_version,
                    registered,
                }) => {
                    if protocol_version != PROTOCOL_VERSION {
                        tracing::warn!(
                            ours = PROTOCOL_VERSION,
                            theirs = protocol_version,
                            "bridge protocol version mismatch"
                        );
                    }
                    return Ok((ws, registered, early));
                }
                Ok(BridgeMessage::LinkFailed { error, status_code }) => {
                    return Err(match status_code {
                        Some(code) => TransportError::from_status_code(code, error),
                        None => TransportError::Other(error),
                    });
                }
                Ok(BridgeMessage::LinkEvent { event }) => early.push(event),
                Ok(BridgeMessage::Ping { timestamp }) => {
                    if let Ok(pong) = serde_json::to_string(&BridgeMessage::Pong { timestamp }) {
                        let _ = ws.send(Message::Text(pong)).await;
                    }
                }
                Ok(other) => tracing::debug!(message = ?other, "ignoring message before link_started"),
                Err(e) => tracing::debug!(error = %e, "failed to parse bridge message"),
            }
        }
        Err(TransportError::Closed)
    }
}

#[async_trait]
impl TransportFactory for BridgeTransportFactory {
    async fn start(&self, req: StartRequest) -> Result<StartedTransport, TransportError> {
        let (ws, registered, early) =
            tokio::time::timeout(self.handshake_timeout, self.connect_and_link(&req))
                .await
                .map_err(|_| TransportError::Timeout)??;

        tracing::info!(
            session_key = %req.key,
            method = %req.method,
            registered,
            "bridge link started"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let client = BridgeClient::spawn(
            req.key.to_string(),
            ws,
            early,
            events_tx,
            ConnOptions {
                request_timeout: self.request_timeout,
                heartbeat_interval: self.heartbeat_interval,
                max_message_bytes: self.max_message_bytes,
            },
        );

        Ok(StartedTransport {
            client: Arc::new(client),
            events: events_rx,
            registered,
        })
    }
}
