//! Disconnect classification and reconnect back-off.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sl_domain::config::ReconnectConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnect reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a transport connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account unlinked this device.
    LoggedOut,
    /// The account rejected the session.
    AuthFailure,
    /// The server asked the client to reconnect.
    RestartRequired,
    TimedOut,
    ConnectionLost,
    StreamError(String),
    /// Any other status code reported by the transport.
    Code(u16),
}

impl DisconnectReason {
    /// Map a transport status code onto a reason.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::AuthFailure,
            408 => Self::TimedOut,
            428 => Self::ConnectionLost,
            515 => Self::RestartRequired,
            other => Self::Code(other),
        }
    }

    /// Reasons that are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::AuthFailure)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::AuthFailure => f.write_str("authentication rejected"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::TimedOut => f.write_str("connection timed out"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::StreamError(detail) => write!(f, "stream error: {detail}"),
            Self::Code(code) => write!(f, "closed with status {code}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry(Duration),
    GiveUp,
}

/// Linear back-off with a ceiling and a hard attempt bound.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// `attempts` is the counter after the current drop was counted
    /// (1 on the first drop).
    pub fn decide(&self, reason: &DisconnectReason, attempts: u32) -> ReconnectDecision {
        if reason.is_terminal() || attempts >= self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        ReconnectDecision::Retry(self.delay_for_attempt(attempts))
    }

    /// `base * attempt`, capped.  Non-decreasing in `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}
