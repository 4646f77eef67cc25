//! Session states and the read-only status projection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sl_domain::config::LinkingMethod;

use crate::session_key::SessionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingLinking,
    Linked,
    DeliveringCredential,
    Reconnecting,
    Failed,
    LoggedOut,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingLinking => "awaiting_linking",
            Self::Linked => "linked",
            Self::DeliveringCredential => "delivering_credential",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::LoggedOut => "logged_out",
            Self::Terminated => "terminated",
        }
    }

    /// Terminal sessions ignore every later event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::LoggedOut | Self::Terminated)
    }

    /// The handshake completed and the credential is being handed over.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked | Self::DeliveringCredential)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Qr,
    PairingCode,
}

/// What the user needs to complete the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkingArtifact {
    Qr { value: String },
    PairingCode { value: String, raw: String },
}

impl LinkingArtifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Qr { .. } => ArtifactKind::Qr,
            Self::PairingCode { .. } => ArtifactKind::PairingCode,
        }
    }

    /// QR payload or the formatted pairing code.
    pub fn value(&self) -> &str {
        match self {
            Self::Qr { value } | Self::PairingCode { value, .. } => value,
        }
    }
}

/// Copy of a session's observable fields, published after every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub key: SessionKey,
    pub method: LinkingMethod,
    pub state: SessionState,
    pub linking_artifact: Option<LinkingArtifact>,
    pub linked_identity: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    /// Every state entered, in order, starting with `Initializing`.
    pub history: Vec<SessionState>,
}

impl StatusSnapshot {
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        self.linking_artifact.as_ref().map(LinkingArtifact::kind)
    }

    pub fn qr(&self) -> Option<&str> {
        match &self.linking_artifact {
            Some(LinkingArtifact::Qr { value }) => Some(value),
            _ => None,
        }
    }

    pub fn pairing_code(&self) -> Option<&str> {
        match &self.linking_artifact {
            Some(LinkingArtifact::PairingCode { value, .. }) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::LoggedOut.is_terminal());
        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::Reconnecting.is_terminal());
    }

    #[test]
    fn artifact_serializes_with_kind() {
        let a = LinkingArtifact::PairingCode {
            value: "ABCD-1234".into(),
            raw: "ABCD1234".into(),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "pairing_code");
        assert_eq!(json["value"], "ABCD-1234");
        assert_eq!(json["raw"], "ABCD1234");
        assert_eq!(a.kind(), ArtifactKind::PairingCode);
    }

    #[test]
    fn state_serializes_snake_case() {
        let s = serde_json::to_string(&SessionState::DeliveringCredential).unwrap();
        assert_eq!(s, "\"delivering_credential\"");
    }
}
