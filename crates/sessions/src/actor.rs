//! Per-session actor.
//!
//! Owns one [`SessionMachine`] and the transport it drives.  Transport
//! events, timer firings, task completions and deletes all arrive on one
//! mpsc queue, so session state is only ever touched from this task and
//! events are applied in arrival order.  Blocking work (transport start,
//! pairing request, delivery) runs in spawned tasks that report back through
//! the same queue, tagged with the transport generation they belong to.

use std::sync::{Arc, Weak};
use std::time::Duration;

use sl_domain::config::Config;
use sl_domain::trace::TraceEvent;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::credentials::{CredentialStore, EraseOutcome};
use crate::delivery::{DeliveryOrchestrator, DeliveryOutcome, DeliveryReport, DeliveryStep};
use crate::machine::{Effect, Input, MachineSettings, SessionMachine};
use crate::policy::DisconnectReason;
use crate::registry::RegistryInner;
use crate::state::StatusSnapshot;
use crate::transport::{
    StartRequest, StartedTransport, TransportClient, TransportError, TransportEvent,
    TransportFactory,
};

/// Commands queued per session.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub factory: Arc<dyn TransportFactory>,
    pub store: Arc<dyn CredentialStore>,
    pub delivery: Arc<DeliveryOrchestrator>,
    pub settings: MachineSettings,
    /// Upper bound on `TransportClient::terminate`.
    pub terminate_timeout: Duration,
}

impl SessionDeps {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn CredentialStore>,
        config: &Config,
    ) -> Self {
        let delivery = Arc::new(DeliveryOrchestrator::new(
            store.clone(),
            config.delivery.clone(),
        ));
        Self {
            factory,
            store,
            delivery,
            settings: MachineSettings::from_config(config),
            terminate_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) enum SessionCommand {
    Started {
        generation: u64,
        result: Result<StartedTransport, TransportError>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    PairingCode {
        generation: u64,
        result: Result<String, TransportError>,
    },
    ReconnectDue,
    DeliveryFinished {
        generation: u64,
        report: DeliveryReport,
    },
    CleanupDue,
    Delete {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

pub(crate) struct SessionActor {
    machine: SessionMachine,
    deps: SessionDeps,
    registry: Weak<RegistryInner>,
    instance: u64,
    tx: mpsc::WeakSender<SessionCommand>,
    rx: mpsc::Receiver<SessionCommand>,
    status: watch::Sender<StatusSnapshot>,
    /// Bumped whenever a transport is started or dropped; results and events
    /// carrying an older value are discarded.
    generation: u64,
    client: Option<Arc<dyn TransportClient>>,
    forwarder: Option<JoinHandle<()>>,
    reconnect_timer: Option<CancellationToken>,
    cleanup_timer: Option<CancellationToken>,
    credential_erased: bool,
    /// Cancels the handle's `released` token once this actor is gone,
    /// however it exits.
    _released: DropGuard,
}

impl SessionActor {
    pub(crate) fn new(
        machine: SessionMachine,
        deps: SessionDeps,
        registry: Weak<RegistryInner>,
        instance: u64,
        tx: mpsc::WeakSender<SessionCommand>,
        rx: mpsc::Receiver<SessionCommand>,
        status: watch::Sender<StatusSnapshot>,
        released: CancellationToken,
    ) -> Self {
        Self {
            machine,
            deps,
            registry,
            instance,
            tx,
            rx,
            status,
            generation: 0,
            client: None,
            forwarder: None,
            reconnect_timer: None,
            cleanup_timer: None,
            credential_erased: false,
            _released: released.drop_guard(),
        }
    }

    pub(crate) async fn run(mut self) {
        let effects = self.machine.start();
        self.apply(effects).await;
        self.publish();

        while !self.machine.state().is_terminal() {
            let Some(cmd) = self.rx.recv().await else {
                break;
            };
            self.dispatch(cmd).await;
            self.publish();
        }

        // Every path out of the loop releases the transport and timers.
        self.cancel_timers();
        self.detach_transport().await;
        self.drain().await;

        let state = self.machine.state();
        TraceEvent::SessionCleanedUp {
            session_key: self.machine.key().to_string(),
            final_state: state.to_string(),
            credential_erased: self.credential_erased,
        }
        .emit();
        tracing::debug!(session_key = %self.machine.key(), state = %state, "session actor stopped");
    }

    /// Answer commands that raced with the terminal transition.
    async fn drain(&mut self) {
        self.rx.close();
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                SessionCommand::Started {
                    result: Ok(stale), ..
                } => stale.client.terminate().await,
                SessionCommand::Delete { reply } => {
                    let _ = reply.send(self.machine.snapshot());
                }
                _ => {}
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.status.send_replace(snapshot);
    }

    async fn dispatch(&mut self, cmd: SessionCommand) {
        let input = match cmd {
            SessionCommand::Started { generation, result } => {
                if generation != self.generation {
                    if let Ok(stale) = result {
                        stale.client.terminate().await;
                    }
                    return;
                }
                match result {
                    Ok(started) => {
                        let registered = started.registered;
                        self.attach(started);
                        Input::TransportStarted { registered }
                    }
                    Err(e) => {
                        tracing::warn!(session_key = %self.machine.key(), error = %e, "transport start failed");
                        Input::TransportStartFailed(e.to_string())
                    }
                }
            }
            SessionCommand::Transport { generation, event } => {
                if generation != self.generation {
                    tracing::debug!(session_key = %self.machine.key(), ?event, "stale transport event dropped");
                    return;
                }
                match event {
                    TransportEvent::QrIssued(qr) => Input::QrIssued(qr),
                    TransportEvent::PairingCodeAvailable(code) => Input::PairingCodeReady(code),
                    TransportEvent::Opened { identity } => Input::Opened { identity },
                    TransportEvent::Closed(reason) => Input::Closed(reason),
                    TransportEvent::CredentialsUpdated(bytes) => {
                        self.save_credential(&bytes).await;
                        return;
                    }
                }
            }
            SessionCommand::PairingCode { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(code) => Input::PairingCodeReady(code),
                    Err(e) => Input::PairingCodeFailed(e),
                }
            }
            SessionCommand::ReconnectDue => {
                self.reconnect_timer = None;
                Input::ReconnectDue
            }
            SessionCommand::DeliveryFinished { generation, report } => {
                if generation != self.generation {
                    // Cut short by a disconnect; the next link delivers again.
                    tracing::debug!(session_key = %self.machine.key(), outcome = ?report.outcome, "interrupted delivery discarded");
                    return;
                }
                tracing::info!(
                    session_key = %self.machine.key(),
                    outcome = ?report.outcome,
                    bytes = report.bytes,
                    "credential delivery finished"
                );
                Input::DeliveryFinished
            }
            SessionCommand::CleanupDue => {
                self.cleanup_timer = None;
                Input::CleanupDue
            }
            SessionCommand::Delete { reply } => {
                let effects = self.machine.handle(Input::Delete);
                self.apply(effects).await;
                let _ = reply.send(self.machine.snapshot());
                return;
            }
        };

        let effects = self.machine.handle(input);
        self.apply(effects).await;
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartTransport => self.start_transport(),
                Effect::RequestPairingCode => self.request_pairing_code(),
                Effect::TerminateTransport => self.detach_transport().await,
                Effect::ScheduleReconnect(delay) => {
                    self.reconnect_timer = self.schedule(delay, SessionCommand::ReconnectDue);
                }
                Effect::RunDelivery { identity } => self.run_delivery(identity),
                Effect::ScheduleCleanup(delay) => {
                    self.cleanup_timer = self.schedule(delay, SessionCommand::CleanupDue);
                }
                Effect::CancelTimers => self.cancel_timers(),
                Effect::EraseCredential => self.erase_credential().await,
                Effect::Deregister => self.deregister(),
            }
        }
    }

    // ── transport ───────────────────────────────────────────────────

    fn start_transport(&mut self) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let factory = self.deps.factory.clone();
        let store = self.deps.store.clone();
        let key = self.machine.key().clone();
        let method = self.machine.method();
        let phone = self.machine.phone().cloned();

        tokio::spawn(async move {
            let credential = match store.load(&key).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(session_key = %key, error = %e, "stored credential unreadable");
                    None
                }
            };
            let req = StartRequest {
                key,
                method,
                phone,
                credential,
            };
            let result = factory.start(req).await;
            // The actor is gone: nobody else will terminate this transport.
            if let Err(mpsc::error::SendError(SessionCommand::Started {
                result: Ok(orphan),
                ..
            })) = tx.send(SessionCommand::Started { generation, result }).await
            {
                orphan.client.terminate().await;
            }
        });
    }

    fn attach(&mut self, started: StartedTransport) {
        let StartedTransport {
            client, mut events, ..
        } = started;
        self.client = Some(client);

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let generation = self.generation;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx
                    .send(SessionCommand::Transport { generation, event })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            // The event stream ended without a close notification.
            let event = TransportEvent::Closed(DisconnectReason::ConnectionLost);
            let _ = tx.send(SessionCommand::Transport { generation, event }).await;
        }));
    }

    /// Stop forwarding events and terminate the current client, if any.
    async fn detach_transport(&mut self) {
        self.generation += 1;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(client) = self.client.take() {
            if tokio::time::timeout(self.deps.terminate_timeout, client.terminate())
                .await
                .is_err()
            {
                tracing::warn!(session_key = %self.machine.key(), "transport terminate timed out");
            }
        }
    }

    fn request_pairing_code(&mut self) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let generation = self.generation;
        let client = self.client.clone();
        let phone = self.machine.phone().cloned();

        tokio::spawn(async move {
            let result = match (client, phone) {
                (Some(client), Some(phone)) => client.request_pairing_code(&phone).await,
                _ => Err(TransportError::Closed),
            };
            let _ = tx
                .send(SessionCommand::PairingCode { generation, result })
                .await;
        });
    }

    // ── delivery & cleanup ──────────────────────────────────────────

    fn run_delivery(&mut self, identity: String) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let generation = self.generation;
        let client = self.client.clone();
        let delivery = self.deps.delivery.clone();
        let key = self.machine.key().clone();

        tokio::spawn(async move {
            let report = match client {
                Some(client) => delivery.deliver(client.as_ref(), &key, &identity).await,
                None => DeliveryReport {
                    outcome: DeliveryOutcome::Failed {
                        step: DeliveryStep::Document,
                        error: TransportError::Closed.to_string(),
                    },
                    bytes: 0,
                    failure_notified: false,
                },
            };
            let _ = tx
                .send(SessionCommand::DeliveryFinished { generation, report })
                .await;
        });
    }

    fn schedule(&self, delay: Duration, cmd: SessionCommand) -> Option<CancellationToken> {
        let tx = self.tx.upgrade()?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(cmd).await;
                }
            }
        });
        Some(token)
    }

    fn cancel_timers(&mut self) {
        for timer in [self.reconnect_timer.take(), self.cleanup_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }
    }

    async fn save_credential(&self, bytes: &[u8]) {
        let key = self.machine.key();
        if let Err(e) = self.deps.store.save(key, bytes).await {
            tracing::warn!(session_key = %key, error = %e, "credential save failed");
        }
    }

    async fn erase_credential(&mut self) {
        let key = self.machine.key();
        match self.deps.store.erase(key).await {
            Ok(EraseOutcome::Erased) => {
                tracing::debug!(session_key = %key, "credential erased");
                self.credential_erased = true;
            }
            Ok(EraseOutcome::NotFound) => {
                tracing::debug!(session_key = %key, "no credential to erase");
            }
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "credential erase failed");
            }
        }
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.machine.key(), self.instance);
        }
    }
}
