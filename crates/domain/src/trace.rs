use serde::Serialize;

/// Structured trace events emitted across all session-linker crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_key: String,
        method: String,
    },
    SessionTransition {
        session_key: String,
        from: String,
        to: String,
    },
    ReconnectScheduled {
        session_key: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    CredentialDelivered {
        session_key: String,
        bytes: usize,
        confirmed: bool,
    },
    DeliveryFailed {
        session_key: String,
        step: String,
        error: String,
    },
    SessionCleanedUp {
        session_key: String,
        final_state: String,
        credential_erased: bool,
    },
    StaleCredentialsSwept {
        removed: usize,
        max_age_secs: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sl_event");
    }
}
