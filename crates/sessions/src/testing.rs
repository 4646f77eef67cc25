//! In-process doubles for the transport and credential store.
//!
//! The scripted transport never touches the network: tests push
//! [`TransportEvent`]s through [`ScriptedFactory::emit`] and inspect what the
//! session sent through [`ScriptedClient::outbound`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sl_domain::error::{Error, Result};
use tokio::sync::mpsc;

use crate::credentials::{CredentialStore, EraseOutcome};
use crate::session_key::{PhoneNumber, SessionKey};
use crate::transport::{
    Document, StartRequest, StartedTransport, TransportClient, TransportError, TransportEvent,
    TransportFactory,
};

/// A message the session sent successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Document { target: String, doc: Document },
    Text { target: String, text: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScriptedClient {
    outbound: Mutex<Vec<Outbound>>,
    pairing_code: Mutex<std::result::Result<String, TransportError>>,
    fail_documents: AtomicBool,
    fail_texts: AtomicBool,
    terminated: AtomicBool,
    pairing_requests: AtomicUsize,
    live: Arc<AtomicUsize>,
    terminate_delay: Option<Duration>,
    send_delay: Option<Duration>,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new(Arc::new(AtomicUsize::new(0)), None, None)
    }
}

impl ScriptedClient {
    fn new(
        live: Arc<AtomicUsize>,
        terminate_delay: Option<Duration>,
        send_delay: Option<Duration>,
    ) -> Self {
        Self {
            outbound: Mutex::new(Vec::new()),
            pairing_code: Mutex::new(Ok("ABCD1234".into())),
            fail_documents: AtomicBool::new(false),
            fail_texts: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            pairing_requests: AtomicUsize::new(0),
            live,
            terminate_delay,
            send_delay,
        }
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().clone()
    }

    pub fn fail_documents(&self) {
        self.fail_documents.store(true, Ordering::SeqCst);
    }

    pub fn fail_texts(&self) {
        self.fail_texts.store(true, Ordering::SeqCst);
    }

    /// `true` once `terminate` has been called, even if it is still running.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn pairing_requests(&self) -> usize {
        self.pairing_requests.load(Ordering::SeqCst)
    }

    /// Wait out the configured send delay; a client terminated meanwhile
    /// fails the send.
    async fn before_send(&self) -> std::result::Result<(), TransportError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl TransportClient for ScriptedClient {
    async fn request_pairing_code(
        &self,
        _phone: &PhoneNumber,
    ) -> std::result::Result<String, TransportError> {
        self.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.pairing_code.lock().clone()
    }

    async fn send_document(
        &self,
        target: &str,
        doc: Document,
    ) -> std::result::Result<(), TransportError> {
        self.before_send().await?;
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(TransportError::Other("scripted document failure".into()));
        }
        self.outbound.lock().push(Outbound::Document {
            target: target.into(),
            doc,
        });
        Ok(())
    }

    async fn send_text(&self, target: &str, text: &str) -> std::result::Result<(), TransportError> {
        self.before_send().await?;
        if self.fail_texts.load(Ordering::SeqCst) {
            return Err(TransportError::Other("scripted text failure".into()));
        }
        self.outbound.lock().push(Outbound::Text {
            target: target.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(delay) = self.terminate_delay {
            tokio::time::sleep(delay).await;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Started {
    events: mpsc::Sender<TransportEvent>,
    client: Arc<ScriptedClient>,
}

/// Starts [`ScriptedClient`]s and keeps a handle on the latest one per key.
#[derive(Default)]
pub struct ScriptedFactory {
    starts: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    terminate_delay: Mutex<Option<Duration>>,
    send_delay: Mutex<Option<Duration>>,
    fail_start: AtomicBool,
    registered: AtomicBool,
    fail_documents: AtomicBool,
    qr_on_start: Mutex<Option<String>>,
    pairing_code: Mutex<Option<std::result::Result<String, TransportError>>>,
    started: Mutex<HashMap<SessionKey, Started>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total transports started so far.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Transports started and not yet terminated.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of transports that were live at the same time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Clients started from now on take `delay` to terminate.
    pub fn slow_terminate(&self, delay: Duration) {
        *self.terminate_delay.lock() = Some(delay);
    }

    /// Clients started from now on take `delay` per outbound message.
    pub fn slow_sends(&self, delay: Duration) {
        *self.send_delay.lock() = Some(delay);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Report restored credentials as an already registered device.
    pub fn registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Every client started from now on fails document sends.
    pub fn fail_documents(&self) {
        self.fail_documents.store(true, Ordering::SeqCst);
    }

    /// Emit this QR payload as soon as each transport starts.
    pub fn qr_on_start(&self, qr: impl Into<String>) {
        *self.qr_on_start.lock() = Some(qr.into());
    }

    /// Outcome of `request_pairing_code` for clients started from now on.
    pub fn pairing_code(&self, result: std::result::Result<String, TransportError>) {
        *self.pairing_code.lock() = Some(result);
    }

    /// Push an event into the latest transport for `key`.
    pub async fn emit(&self, key: &SessionKey, event: TransportEvent) -> bool {
        let tx = self.started.lock().get(key).map(|s| s.events.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Latest client started for `key`.
    pub fn client(&self, key: &SessionKey) -> Option<Arc<ScriptedClient>> {
        self.started.lock().get(key).map(|s| s.client.clone())
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn start(&self, req: StartRequest) -> std::result::Result<StartedTransport, TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::Io("scripted start failure".into()));
        }

        let (tx, rx) = mpsc::channel(32);
        let client = Arc::new(ScriptedClient::new(
            self.live.clone(),
            *self.terminate_delay.lock(),
            *self.send_delay.lock(),
        ));
        if let Some(result) = self.pairing_code.lock().clone() {
            *client.pairing_code.lock() = result;
        }
        if self.fail_documents.load(Ordering::SeqCst) {
            client.fail_documents();
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        if let Some(qr) = self.qr_on_start.lock().clone() {
            let _ = tx.try_send(TransportEvent::QrIssued(qr));
        }
        self.started.lock().insert(
            req.key,
            Started {
                events: tx,
                client: client.clone(),
            },
        );

        Ok(StartedTransport {
            client,
            events: rx,
            registered: self.registered.load(Ordering::SeqCst),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<SessionKey, Vec<u8>>>,
    erase_calls: AtomicUsize,
    fail_erase: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn erase_calls(&self) -> usize {
        self.erase_calls.load(Ordering::SeqCst)
    }

    /// Make `erase` return an error (after dropping the entry anyway).
    pub fn fail_erase(&self) {
        self.fail_erase.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn save(&self, key: &SessionKey, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    async fn erase(&self, key: &SessionKey) -> Result<EraseOutcome> {
        self.erase_calls.fetch_add(1, Ordering::SeqCst);
        let existed = self.entries.lock().remove(key).is_some();
        if self.fail_erase.load(Ordering::SeqCst) {
            return Err(Error::Other("scripted erase failure".into()));
        }
        Ok(if existed {
            EraseOutcome::Erased
        } else {
            EraseOutcome::NotFound
        })
    }
}
