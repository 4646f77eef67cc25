//! Session registry: the single owner of the key → session mapping.
//!
//! The map lock is held across check-and-insert, so concurrent callers for
//! the same key never start two transports.  A session being deleted keeps
//! its entry until its actor has released the transport and credential, and
//! a create for that key waits for the release.  Sessions deregister
//! themselves on termination; the instance id guards against a finished
//! session removing its successor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sl_domain::config::LinkingMethod;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::actor::{SessionActor, SessionCommand, SessionDeps, CHANNEL_CAPACITY};
use crate::error::LinkError;
use crate::machine::SessionMachine;
use crate::session_key::{PhoneNumber, SessionKey};
use crate::state::{SessionState, StatusSnapshot};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap, cloneable reference to one running (or finished) session.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    instance: u64,
    tx: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<StatusSnapshot>,
    /// Set once a delete has been requested.
    closing: Arc<AtomicBool>,
    /// Cancelled when the actor has exited.
    released: CancellationToken,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Latest published snapshot.  Still readable after the actor exits.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Wait until `pred` holds or `timeout` passes, returning the snapshot
    /// observed last either way.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> StatusSnapshot
    where
        F: Fn(&StatusSnapshot) -> bool,
    {
        let mut rx = self.status.clone();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| pred(s)).await.map(|s| s.clone())
        })
        .await;
        match waited {
            Ok(Ok(snapshot)) => snapshot,
            _ => self.status(),
        }
    }

    /// Neither finished nor on its way out.
    pub fn is_live(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.status().state.is_terminal()
    }

    /// Resolves once the session's actor has exited and released everything
    /// it held.
    pub async fn released(&self) {
        self.released.cancelled().await;
    }

    /// Ask the session to terminate and wait for its final snapshot.
    pub async fn delete(&self) -> Result<StatusSnapshot, LinkError> {
        self.closing.store(true, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Delete { reply })
            .await
            .map_err(|_| LinkError::ActorShutdown)?;
        rx.await.map_err(|_| LinkError::ActorShutdown)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a caller asks for when opening a session.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub key: SessionKey,
    pub method: LinkingMethod,
    pub phone: Option<PhoneNumber>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    /// Handshake completed, credential hand-over in progress.
    pub linked: usize,
    /// Still linking or reconnecting.
    pub pending: usize,
    /// Failed or logged out, kept for inspection.
    pub finished: usize,
}

pub(crate) struct RegistryInner {
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    deps: SessionDeps,
    next_instance: AtomicU64,
}

impl RegistryInner {
    pub(crate) fn deregister(&self, key: &SessionKey, instance: u64) {
        let mut sessions = self.sessions.lock();
        if sessions.get(key).map(|h| h.instance) == Some(instance) {
            sessions.remove(key);
            tracing::debug!(session_key = %key, "session deregistered");
        }
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                deps,
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Return the live session for `req.key`, or start a new one.
    ///
    /// A session that already finished (failed, logged out) is replaced.  If
    /// the previous session for the key is still tearing down, this waits
    /// until it has released its transport and credential.  The boolean is
    /// `true` when a session was created.
    pub async fn get_or_create(
        &self,
        req: CreateRequest,
    ) -> Result<(SessionHandle, bool), LinkError> {
        if req.method == LinkingMethod::PairingCode && req.phone.is_none() {
            return Err(LinkError::PhoneRequired);
        }

        loop {
            let previous = {
                let mut sessions = self.inner.sessions.lock();
                let releasing = match sessions.get(&req.key) {
                    Some(existing) if existing.is_live() => {
                        return Ok((existing.clone(), false));
                    }
                    Some(existing) if !existing.released.is_cancelled() => Some(existing.clone()),
                    Some(_) => {
                        tracing::debug!(session_key = %req.key, "replacing finished session");
                        None
                    }
                    None => None,
                };
                match releasing {
                    Some(previous) => previous,
                    None => {
                        let handle = self.spawn(req);
                        sessions.insert(handle.key.clone(), handle.clone());
                        return Ok((handle, true));
                    }
                }
            };
            tracing::debug!(session_key = %req.key, "waiting for previous session to release");
            previous.released().await;
        }
    }

    fn spawn(&self, req: CreateRequest) -> SessionHandle {
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let machine = SessionMachine::new(
            req.key.clone(),
            req.method,
            req.phone,
            self.inner.deps.settings.clone(),
        );
        let (status_tx, status_rx) = watch::channel(machine.snapshot());
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let released = CancellationToken::new();

        let actor = SessionActor::new(
            machine,
            self.inner.deps.clone(),
            Arc::downgrade(&self.inner),
            instance,
            tx.downgrade(),
            rx,
            status_tx,
            released.clone(),
        );
        tokio::spawn(actor.run());

        SessionHandle {
            key: req.key,
            instance,
            tx,
            status: status_rx,
            closing: Arc::new(AtomicBool::new(false)),
            released,
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<StatusSnapshot> {
        self.inner.sessions.lock().get(key).map(SessionHandle::status)
    }

    pub fn handle(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.inner.sessions.lock().get(key).cloned()
    }

    /// Delete a session.  Idempotent: `None` when nothing was registered.
    ///
    /// The entry stays in place until the actor has exited, so a concurrent
    /// [`get_or_create`](Self::get_or_create) for the key cannot start a
    /// second transport or have its credential erased by this teardown.
    pub async fn remove(&self, key: &SessionKey) -> Option<StatusSnapshot> {
        let handle = self.handle(key)?;
        let snapshot = match handle.delete().await {
            Ok(snapshot) => snapshot,
            // Already finished; its last snapshot is final.
            Err(_) => handle.status(),
        };
        handle.released().await;
        self.inner.deregister(key, handle.instance);
        Some(snapshot)
    }

    pub fn list(&self) -> Vec<StatusSnapshot> {
        let mut all: Vec<_> = self
            .inner
            .sessions
            .lock()
            .values()
            .map(SessionHandle::status)
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Keys of sessions that are neither finished nor being deleted.
    pub fn live_keys(&self) -> HashSet<SessionKey> {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|h| h.is_live())
            .map(|h| h.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for snap in self.list() {
            stats.total += 1;
            match snap.state {
                SessionState::Linked | SessionState::DeliveringCredential => stats.linked += 1,
                SessionState::Failed | SessionState::LoggedOut | SessionState::Terminated => {
                    stats.finished += 1
                }
                _ => stats.pending += 1,
            }
        }
        stats
    }

    /// Drop finished sessions whose last event is older than `max_age`.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut sessions = self.inner.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, h| {
            let snap = h.status();
            !(snap.state.is_terminal() && snap.last_event_at < cutoff)
        });
        before - sessions.len()
    }

    /// Terminate every session.  Used at process shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .lock()
            .drain()
            .map(|(_, h)| h)
            .collect();
        if handles.is_empty() {
            return;
        }
        tracing::info!(sessions = handles.len(), "shutting down sessions");
        let mut set = JoinSet::new();
        for handle in handles {
            set.spawn(async move {
                let _ = handle.delete().await;
            });
        }
        while set.join_next().await.is_some() {}
    }
}
