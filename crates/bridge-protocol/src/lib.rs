//! Bridge protocol: WebSocket message types exchanged with the messaging
//! bridge sidecar.
//!
//! The gateway opens one WebSocket per linking attempt.  It sends
//! `link_start`, the bridge answers `link_started` (or `link_failed`), and
//! from then on pushes `link_event`s while the gateway issues correlated
//! requests (`pairing_code_request`, `send_document`, `send_text`) that the
//! bridge answers with a `response` carrying the same `request_id`.

use serde::{Deserialize, Serialize};

/// Bumped on incompatible changes to [`BridgeMessage`].
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    // ── Gateway → Bridge ─────────────────────────────────────────────
    /// Begin linking a device.
    LinkStart {
        protocol_version: u32,
        session_key: String,
        /// `qr` or `pairing_code`.
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone: Option<String>,
        /// Hex-encoded credential saved by an earlier attempt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
        device_name: String,
    },

    PairingCodeRequest {
        request_id: String,
        phone: String,
    },

    SendDocument {
        request_id: String,
        target: String,
        file_name: String,
        mime_type: String,
        caption: String,
        /// Hex-encoded document body.
        data: String,
    },

    SendText {
        request_id: String,
        target: String,
        text: String,
    },

    /// Close the linking connection and release its resources.
    LinkStop,

    // ── Bridge → Gateway ─────────────────────────────────────────────
    LinkStarted {
        protocol_version: u32,
        /// A restored credential already belongs to a registered device.
        #[serde(default)]
        registered: bool,
    },

    LinkFailed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    LinkEvent {
        event: LinkEvent,
    },

    /// Answer to a correlated request.
    Response {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResponseError>,
    },

    // ── Bidirectional ────────────────────────────────────────────────
    Ping {
        timestamp: i64,
    },

    Pong {
        timestamp: i64,
    },
}

/// Connection-level events pushed by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkEvent {
    Qr { payload: String },
    PairingCode { code: String },
    Opened { identity: String },
    Closed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Hex-encoded credential material.
    Credentials { data: String },
}

/// Error detail on a failed [`BridgeMessage::Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    /// Upstream status code, when the network reported one (404, 429, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Hex-encode binary payloads for the wire.
pub fn encode_bytes(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn decode_bytes(data: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_snake_case() {
        let msg = BridgeMessage::PairingCodeRequest {
            request_id: "r1".into(),
            phone: "15551234567".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "pairing_code_request");
        assert_eq!(json["phone"], "15551234567");
    }

    #[test]
    fn link_event_parses_from_bridge_json() {
        let raw = r#"{"type":"link_event","event":{"kind":"closed","status_code":401}}"#;
        let msg: BridgeMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            BridgeMessage::LinkEvent {
                event: LinkEvent::Closed {
                    status_code: Some(401),
                    reason: None,
                }
            }
        );
    }

    #[test]
    fn optional_fields_omitted() {
        let msg = BridgeMessage::LinkStart {
            protocol_version: PROTOCOL_VERSION,
            session_key: "qr_session_abc".into(),
            method: "qr".into(),
            phone: None,
            credential: None,
            device_name: "session-linker".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("phone"));
        assert!(!json.contains("credential"));
    }

    #[test]
    fn failed_response_carries_status() {
        let raw = r#"{"type":"response","request_id":"r9","ok":false,"error":{"message":"rate limited","status_code":429}}"#;
        let msg: BridgeMessage = serde_json::from_str(raw).unwrap();
        match msg {
            BridgeMessage::Response { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.unwrap().status_code, Some(429));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bytes_hex_encoded() {
        assert_eq!(encode_bytes(b"{}"), "7b7d");
        assert_eq!(decode_bytes("7b7d").unwrap(), b"{}");
        assert!(decode_bytes("zz").is_err());
    }
}
