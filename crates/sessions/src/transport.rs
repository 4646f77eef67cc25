//! Seam between the session core and the messaging network.
//!
//! A [`TransportFactory`] starts one [`TransportClient`] per linking
//! attempt.  The client pushes [`TransportEvent`]s into an mpsc channel the
//! session actor drains; outbound operations are async trait methods.

use std::sync::Arc;

use async_trait::async_trait;
use sl_domain::config::LinkingMethod;
use tokio::sync::mpsc;

use crate::policy::DisconnectReason;
use crate::session_key::{PhoneNumber, SessionKey};

/// Inbound events from a running transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A (possibly refreshed) QR payload to show the user.
    QrIssued(String),
    /// The transport produced a pairing code on its own.
    PairingCodeAvailable(String),
    /// Handshake finished; `identity` is the linked account address.
    Opened { identity: String },
    Closed(DisconnectReason),
    /// Fresh credential material to persist.
    CredentialsUpdated(Vec<u8>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("too many pairing attempts, try again later")]
    RateLimited,
    #[error("invalid phone number")]
    InvalidIdentity,
    #[error("transport closed")]
    Closed,
    #[error("transport timed out")]
    Timeout,
    #[error("transport I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Classify a status code returned for a failed request.
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            404 => Self::InvalidIdentity,
            429 => Self::RateLimited,
            408 => Self::Timeout,
            _ => Self::Other(message.into()),
        }
    }
}

/// Outbound document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub caption: String,
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Ask the network for a pairing code for `phone`.  Returns the raw code.
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String, TransportError>;

    async fn send_document(&self, target: &str, doc: Document) -> Result<(), TransportError>;

    async fn send_text(&self, target: &str, text: &str) -> Result<(), TransportError>;

    /// Close the connection and release resources.  Idempotent.
    async fn terminate(&self);
}

/// Parameters for one transport start.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub key: SessionKey,
    pub method: LinkingMethod,
    pub phone: Option<PhoneNumber>,
    /// Previously saved credential, if the store had one.
    pub credential: Option<Vec<u8>>,
}

pub struct StartedTransport {
    pub client: Arc<dyn TransportClient>,
    pub events: mpsc::Receiver<TransportEvent>,
    /// The restored credential already belongs to a registered device, so no
    /// pairing code should be requested.
    pub registered: bool,
}

impl std::fmt::Debug for StartedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedTransport")
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn start(&self, req: StartRequest) -> Result<StartedTransport, TransportError>;
}

// ── helpers ─────────────────────────────────────────────────────────

/// `ABCD1234` → `ABCD-1234`.  A group size of 0 leaves the code unchanged.
pub fn format_pairing_code(raw: &str, group: usize) -> String {
    if group == 0 {
        return raw.to_string();
    }
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(group)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip a device suffix from an account address
/// (`15551234567:12@host` → `15551234567@host`).
pub fn normalize_identity(identity: &str) -> String {
    match identity.split_once('@') {
        Some((user, host)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{user}@{host}")
        }
        None => identity.split(':').next().unwrap_or(identity).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_groups_of_four() {
        assert_eq!(format_pairing_code("ABCD1234", 4), "ABCD-1234");
        assert_eq!(format_pairing_code("ABCDE", 4), "ABCD-E");
        assert_eq!(format_pairing_code("", 4), "");
        assert_eq!(format_pairing_code("ABCD", 0), "ABCD");
    }

    #[test]
    fn identity_device_suffix_removed() {
        assert_eq!(normalize_identity("15551234567:12@s.net"), "15551234567@s.net");
        assert_eq!(normalize_identity("15551234567@s.net"), "15551234567@s.net");
        assert_eq!(normalize_identity("15551234567:3"), "15551234567");
    }

    #[test]
    fn request_failures_classified() {
        assert_eq!(
            TransportError::from_status_code(404, "nope"),
            TransportError::InvalidIdentity
        );
        assert_eq!(
            TransportError::from_status_code(429, "slow down"),
            TransportError::RateLimited
        );
        assert_eq!(
            TransportError::from_status_code(500, "boom"),
            TransportError::Other("boom".into())
        );
    }
}
