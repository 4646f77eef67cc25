//! Pure session state machine.
//!
//! [`SessionMachine::handle`] is the only place session state changes.  It
//! performs no I/O: every side effect is returned as an [`Effect`] for the
//! actor to execute, which keeps the transition table testable without a
//! runtime.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sl_domain::config::{Config, DeliveryConfig, LinkingMethod};
use sl_domain::trace::TraceEvent;

use crate::policy::{DisconnectReason, ReconnectDecision, ReconnectPolicy};
use crate::session_key::{PhoneNumber, SessionKey};
use crate::state::{LinkingArtifact, SessionState, StatusSnapshot};
use crate::transport::{format_pairing_code, normalize_identity, TransportError};

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    TransportStarted { registered: bool },
    TransportStartFailed(String),
    QrIssued(String),
    /// Raw pairing code, unformatted.
    PairingCodeReady(String),
    PairingCodeFailed(TransportError),
    Opened { identity: String },
    Closed(DisconnectReason),
    ReconnectDue,
    DeliveryFinished,
    CleanupDue,
    Delete,
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartTransport,
    RequestPairingCode,
    TerminateTransport,
    ScheduleReconnect(Duration),
    RunDelivery { identity: String },
    ScheduleCleanup(Duration),
    CancelTimers,
    EraseCredential,
    Deregister,
}

/// Tunables the machine needs from configuration.
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub policy: ReconnectPolicy,
    pub pairing_code_group: usize,
    pub cleanup_grace: Duration,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            pairing_code_group: 4,
            cleanup_grace: Duration::from_secs(DeliveryConfig::default().cleanup_grace_secs),
        }
    }
}

impl MachineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            policy: ReconnectPolicy::from(&cfg.reconnect),
            pairing_code_group: cfg.linking.pairing_code_group,
            cleanup_grace: Duration::from_secs(cfg.delivery.cleanup_grace_secs),
        }
    }
}

#[derive(Debug)]
pub struct SessionMachine {
    key: SessionKey,
    method: LinkingMethod,
    phone: Option<PhoneNumber>,
    state: SessionState,
    artifact: Option<LinkingArtifact>,
    linked_identity: Option<String>,
    last_error: Option<String>,
    reconnect_attempts: u32,
    created_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    history: Vec<SessionState>,
    delivery_done: bool,
    settings: MachineSettings,
}

impl SessionMachine {
    pub fn new(
        key: SessionKey,
        method: LinkingMethod,
        phone: Option<PhoneNumber>,
        settings: MachineSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            method,
            phone,
            state: SessionState::Initializing,
            artifact: None,
            linked_identity: None,
            last_error: None,
            reconnect_attempts: 0,
            created_at: now,
            last_event_at: now,
            history: vec![SessionState::Initializing],
            delivery_done: false,
            settings,
        }
    }

    /// Effects to run when the session is first spawned.
    pub fn start(&mut self) -> Vec<Effect> {
        TraceEvent::SessionCreated {
            session_key: self.key.to_string(),
            method: self.method.to_string(),
        }
        .emit();
        vec![Effect::StartTransport]
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn method(&self) -> LinkingMethod {
        self.method
    }

    pub fn phone(&self) -> Option<&PhoneNumber> {
        self.phone.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            key: self.key.clone(),
            method: self.method,
            state: self.state,
            linking_artifact: self.artifact.clone(),
            linked_identity: self.linked_identity.clone(),
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
            created_at: self.created_at,
            last_event_at: self.last_event_at,
            history: self.history.clone(),
        }
    }

    /// Apply one input.  Terminal sessions ignore everything.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.state.is_terminal() {
            tracing::debug!(
                session_key = %self.key,
                state = %self.state,
                ?input,
                "input ignored by terminal session"
            );
            return Vec::new();
        }
        self.last_event_at = Utc::now();

        match input {
            Input::TransportStarted { registered } => self.on_transport_started(registered),
            Input::TransportStartFailed(err) => {
                self.on_closed(DisconnectReason::StreamError(err))
            }
            Input::QrIssued(qr) => self.on_qr(qr),
            Input::PairingCodeReady(raw) => self.on_pairing_code(raw),
            Input::PairingCodeFailed(err) => self.on_pairing_code_failed(err),
            Input::Opened { identity } => self.on_opened(identity),
            Input::Closed(reason) => self.on_closed(reason),
            Input::ReconnectDue => self.on_reconnect_due(),
            Input::DeliveryFinished => self.on_delivery_finished(),
            Input::CleanupDue => self.on_cleanup_due(),
            Input::Delete => self.terminate(),
        }
    }

    // ── handlers ────────────────────────────────────────────────────

    fn on_transport_started(&mut self, registered: bool) -> Vec<Effect> {
        if self.state != SessionState::Initializing {
            return Vec::new();
        }
        if self.method != LinkingMethod::PairingCode || registered {
            return Vec::new();
        }
        if self.phone.is_none() {
            return self.fail("pairing-code linking requires a phone number".into());
        }
        vec![Effect::RequestPairingCode]
    }

    fn on_qr(&mut self, qr: String) -> Vec<Effect> {
        if self.method != LinkingMethod::Qr || !self.accepts_artifact() {
            tracing::debug!(session_key = %self.key, state = %self.state, "QR ignored");
            return Vec::new();
        }
        self.enter(SessionState::AwaitingLinking);
        self.artifact = Some(LinkingArtifact::Qr { value: qr });
        self.last_error = None;
        Vec::new()
    }

    fn on_pairing_code(&mut self, raw: String) -> Vec<Effect> {
        if self.method != LinkingMethod::PairingCode || !self.accepts_artifact() {
            tracing::debug!(session_key = %self.key, state = %self.state, "pairing code ignored");
            return Vec::new();
        }
        let value = format_pairing_code(&raw, self.settings.pairing_code_group);
        self.enter(SessionState::AwaitingLinking);
        self.artifact = Some(LinkingArtifact::PairingCode { value, raw });
        self.last_error = None;
        Vec::new()
    }

    fn on_pairing_code_failed(&mut self, err: TransportError) -> Vec<Effect> {
        if self.state != SessionState::Initializing {
            return Vec::new();
        }
        // Only a refusal from the network is final; a lost or slow transport
        // gets another attempt.
        match err {
            TransportError::Timeout => self.on_closed(DisconnectReason::TimedOut),
            TransportError::Closed => self.on_closed(DisconnectReason::ConnectionLost),
            TransportError::Io(e) => self.on_closed(DisconnectReason::StreamError(e)),
            err => self.fail(format!("pairing code request failed: {err}")),
        }
    }

    fn on_opened(&mut self, identity: String) -> Vec<Effect> {
        if !matches!(
            self.state,
            SessionState::Initializing | SessionState::AwaitingLinking
        ) {
            tracing::debug!(session_key = %self.key, state = %self.state, "open ignored");
            return Vec::new();
        }
        let identity = normalize_identity(&identity);
        self.enter(SessionState::Linked);
        self.linked_identity = Some(identity.clone());
        self.reconnect_attempts = 0;
        self.last_error = None;

        self.enter(SessionState::DeliveringCredential);
        vec![Effect::RunDelivery { identity }]
    }

    fn on_closed(&mut self, reason: DisconnectReason) -> Vec<Effect> {
        match reason {
            DisconnectReason::LoggedOut => {
                self.last_error = Some(reason.to_string());
                self.enter(SessionState::LoggedOut);
                return Self::release_effects();
            }
            DisconnectReason::AuthFailure => return self.fail(reason.to_string()),
            _ => {}
        }

        match self.state {
            SessionState::Initializing | SessionState::AwaitingLinking => {}
            // The hand-over was cut short; the next link delivers again.
            SessionState::DeliveringCredential if !self.delivery_done => {}
            SessionState::DeliveringCredential => {
                // Already delivered; cleanup is scheduled and tears down anyway.
                self.last_error = Some(reason.to_string());
                return Vec::new();
            }
            _ => return Vec::new(),
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        match self.settings.policy.decide(&reason, attempt) {
            ReconnectDecision::Retry(delay) => {
                self.last_error = Some(reason.to_string());
                self.enter(SessionState::Reconnecting);
                TraceEvent::ReconnectScheduled {
                    session_key: self.key.to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    reason: reason.to_string(),
                }
                .emit();
                vec![Effect::TerminateTransport, Effect::ScheduleReconnect(delay)]
            }
            ReconnectDecision::GiveUp => {
                self.fail(format!("gave up after {attempt} attempt(s): {reason}"))
            }
        }
    }

    fn on_reconnect_due(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Reconnecting {
            return Vec::new();
        }
        self.enter(SessionState::Initializing);
        vec![Effect::StartTransport]
    }

    fn on_delivery_finished(&mut self) -> Vec<Effect> {
        if self.state != SessionState::DeliveringCredential || self.delivery_done {
            return Vec::new();
        }
        self.delivery_done = true;
        vec![Effect::ScheduleCleanup(self.settings.cleanup_grace)]
    }

    fn on_cleanup_due(&mut self) -> Vec<Effect> {
        if !self.delivery_done {
            return Vec::new();
        }
        self.terminate()
    }

    // ── helpers ─────────────────────────────────────────────────────

    fn accepts_artifact(&self) -> bool {
        matches!(
            self.state,
            SessionState::Initializing | SessionState::AwaitingLinking
        )
    }

    fn terminate(&mut self) -> Vec<Effect> {
        self.enter(SessionState::Terminated);
        let mut effects = Self::release_effects();
        effects.push(Effect::Deregister);
        effects
    }

    fn fail(&mut self, error: String) -> Vec<Effect> {
        tracing::warn!(session_key = %self.key, error = %error, "session failed");
        self.last_error = Some(error);
        self.enter(SessionState::Failed);
        Self::release_effects()
    }

    fn release_effects() -> Vec<Effect> {
        vec![
            Effect::CancelTimers,
            Effect::TerminateTransport,
            Effect::EraseCredential,
        ]
    }

    fn enter(&mut self, to: SessionState) {
        let from = self.state;
        if to != SessionState::AwaitingLinking {
            self.artifact = None;
        }
        if !to.is_linked() {
            self.linked_identity = None;
        }
        if from == to {
            return;
        }
        self.state = to;
        self.history.push(to);
        TraceEvent::SessionTransition {
            session_key: self.key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
        .emit();
    }
}
