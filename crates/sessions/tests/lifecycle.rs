//! End-to-end session lifecycle against the scripted transport.

use std::sync::Arc;
use std::time::Duration;

use sl_domain::config::{Config, LinkingMethod};
use sl_sessions::testing::{MemoryCredentialStore, Outbound, ScriptedFactory};
use sl_sessions::{
    CreateRequest, CredentialStore, DisconnectReason, PhoneNumber, PhoneRules, SessionDeps,
    SessionKey, SessionRegistry, SessionState, TransportError, TransportEvent,
};

const WAIT: Duration = Duration::from_secs(60);

struct Harness {
    registry: SessionRegistry,
    factory: Arc<ScriptedFactory>,
    store: Arc<MemoryCredentialStore>,
}

fn harness(max_attempts: u32) -> Harness {
    let factory = ScriptedFactory::new();
    let store = Arc::new(MemoryCredentialStore::default());
    let mut config = Config::default();
    config.reconnect.max_attempts = max_attempts;
    let deps = SessionDeps::new(factory.clone(), store.clone(), &config);
    Harness {
        registry: SessionRegistry::new(deps),
        factory,
        store,
    }
}

fn phone() -> PhoneNumber {
    PhoneNumber::parse("15551234567", PhoneRules::default()).unwrap()
}

fn pairing_request() -> CreateRequest {
    CreateRequest {
        key: SessionKey::for_phone(&phone()),
        method: LinkingMethod::PairingCode,
        phone: Some(phone()),
    }
}

fn qr_request() -> CreateRequest {
    CreateRequest {
        key: SessionKey::anonymous(),
        method: LinkingMethod::Qr,
        phone: None,
    }
}

// ── Scenario A ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pairing_code_session_links_delivers_and_cleans_up() {
    let h = harness(3);
    let req = pairing_request();
    let key = req.key.clone();

    let (handle, created) = h.registry.get_or_create(req).await.unwrap();
    assert!(created);

    let snap = handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    assert_eq!(snap.state, SessionState::AwaitingLinking);
    assert_eq!(snap.pairing_code(), Some("ABCD-1234"));

    assert!(
        h.factory
            .emit(&key, TransportEvent::CredentialsUpdated(br#"{"me":"x"}"#.to_vec()))
            .await
    );
    assert!(
        h.factory
            .emit(
                &key,
                TransportEvent::Opened {
                    identity: "15551234567:7@s.net".into(),
                },
            )
            .await
    );

    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Terminated);
    assert_eq!(
        snap.history,
        vec![
            SessionState::Initializing,
            SessionState::AwaitingLinking,
            SessionState::Linked,
            SessionState::DeliveringCredential,
            SessionState::Terminated,
        ]
    );
    assert!(h.registry.get(&key).is_none());
    assert!(!h.store.contains(&key));
    assert_eq!(h.store.load(&key).await.unwrap(), None);
    assert_eq!(h.factory.live(), 0);

    let client = h.factory.client(&key).unwrap();
    assert_eq!(client.pairing_requests(), 1);
    let sent = client.outbound();
    assert_eq!(sent.len(), 2);
    assert!(
        matches!(&sent[0], Outbound::Document { target, doc }
            if target == "15551234567@s.net" && doc.bytes == br#"{"me":"x"}"#)
    );
    assert!(matches!(&sent[1], Outbound::Text { .. }));
}

// ── Scenario B ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn repeated_transient_drops_fail_the_session() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();

    let snap = handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    assert_eq!(snap.qr(), Some("2@qr-payload"));

    for attempt in 1..=2u32 {
        h.factory
            .emit(&key, TransportEvent::Closed(DisconnectReason::ConnectionLost))
            .await;
        let snap = handle
            .wait_for(WAIT, |s| {
                s.state == SessionState::AwaitingLinking && s.reconnect_attempts == attempt
            })
            .await;
        assert_eq!(snap.state, SessionState::AwaitingLinking);
        assert_eq!(snap.reconnect_attempts, attempt);
    }

    h.factory
        .emit(&key, TransportEvent::Closed(DisconnectReason::ConnectionLost))
        .await;
    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Failed);
    assert_eq!(snap.reconnect_attempts, 3);
    assert!(snap.last_error.is_some());
    assert_eq!(h.factory.starts(), 3);

    // No retry is ever scheduled after giving up.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.factory.starts(), 3);
    assert_eq!(h.factory.live(), 0);

    // Failed sessions stay observable until replaced or deleted.
    assert_eq!(
        h.registry.get(&key).map(|s| s.state),
        Some(SessionState::Failed)
    );
}

// ── Scenario C ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn delete_while_awaiting_terminates_immediately() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    h.store.save(&key, b"{}").await.unwrap();

    let snap = h.registry.remove(&key).await.unwrap();
    assert_eq!(snap.state, SessionState::Terminated);
    assert_eq!(snap.linking_artifact, None);
    assert_eq!(h.store.erase_calls(), 1);
    assert!(!h.store.contains(&key));
    assert!(h.registry.get(&key).is_none());
    assert_eq!(h.factory.live(), 0);

    // Idempotent.
    assert!(h.registry.remove(&key).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_pending_reconnect() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;

    h.factory
        .emit(&key, TransportEvent::Closed(DisconnectReason::TimedOut))
        .await;
    let snap = handle
        .wait_for(WAIT, |s| s.state == SessionState::Reconnecting)
        .await;
    assert_eq!(snap.state, SessionState::Reconnecting);

    let snap = h.registry.remove(&key).await.unwrap();
    assert_eq!(snap.state, SessionState::Terminated);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.starts(), 1);
    assert_eq!(h.factory.live(), 0);
}

// ── Scenario D ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_document_send_still_tears_down() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    h.factory.fail_documents();
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;

    h.factory
        .emit(&key, TransportEvent::CredentialsUpdated(b"{}".to_vec()))
        .await;
    h.factory
        .emit(
            &key,
            TransportEvent::Opened {
                identity: "15551234567@s.net".into(),
            },
        )
        .await;

    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Terminated);
    assert!(!h.store.contains(&key));
    assert!(h.registry.get(&key).is_none());

    let sent = h.factory.client(&key).unwrap().outbound();
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Outbound::Text { text, .. } if text.contains("could not be delivered")));
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_delivery_reconnects_and_delivers_once() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    h.factory.slow_sends(Duration::from_secs(5));
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    h.factory
        .emit(&key, TransportEvent::CredentialsUpdated(b"{}".to_vec()))
        .await;
    h.factory
        .emit(
            &key,
            TransportEvent::Opened {
                identity: "15551234567@s.net".into(),
            },
        )
        .await;
    handle
        .wait_for(WAIT, |s| s.state == SessionState::DeliveringCredential)
        .await;
    let first = h.factory.client(&key).unwrap();

    h.factory
        .emit(&key, TransportEvent::Closed(DisconnectReason::ConnectionLost))
        .await;
    let snap = handle
        .wait_for(WAIT, |s| {
            s.state == SessionState::AwaitingLinking && s.reconnect_attempts == 1
        })
        .await;
    assert_eq!(snap.state, SessionState::AwaitingLinking);
    assert!(snap.history.contains(&SessionState::Reconnecting));
    assert_eq!(h.factory.starts(), 2);

    h.factory
        .emit(
            &key,
            TransportEvent::Opened {
                identity: "15551234567@s.net".into(),
            },
        )
        .await;
    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Terminated);

    // The interrupted hand-over sent nothing; the second one sent both parts.
    assert!(first.outbound().is_empty());
    let sent = h.factory.client(&key).unwrap().outbound();
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Outbound::Document { .. }));
    assert!(matches!(&sent[1], Outbound::Text { text, .. } if !text.contains("could not be delivered")));
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn pairing_code_timeouts_are_retried_until_the_limit() {
    let h = harness(3);
    h.factory.pairing_code(Err(TransportError::Timeout));
    let (handle, _) = h.registry.get_or_create(pairing_request()).await.unwrap();

    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Failed);
    assert_eq!(snap.reconnect_attempts, 3);
    assert!(snap.last_error.unwrap().contains("gave up"));
    assert_eq!(h.factory.starts(), 3);
    assert_eq!(h.factory.live(), 0);
}

// ── registry behaviour ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_start_one_transport() {
    let h = harness(3);
    let key = SessionKey::for_phone(&phone());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.get_or_create(pairing_request()).await.unwrap().1
        }));
    }
    let mut created = 0;
    for t in tasks {
        if t.await.unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let handle = h.registry.handle(&key).unwrap();
    handle
        .wait_for(Duration::from_secs(5), |s| {
            s.state == SessionState::AwaitingLinking
        })
        .await;
    assert_eq!(h.factory.starts(), 1);
    assert_eq!(h.registry.len(), 1);

    h.registry.shutdown().await;
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_during_delete_waits_for_teardown() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    h.factory.slow_terminate(Duration::from_secs(2));
    let req = CreateRequest {
        key: SessionKey::for_phone(&phone()),
        method: LinkingMethod::Qr,
        phone: Some(phone()),
    };
    let key = req.key.clone();
    let (old, _) = h.registry.get_or_create(req.clone()).await.unwrap();
    old.wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    let old_client = h.factory.client(&key).unwrap();

    let registry = h.registry.clone();
    let removed_key = key.clone();
    let removal = tokio::spawn(async move { registry.remove(&removed_key).await });
    while !old_client.is_terminated() {
        tokio::task::yield_now().await;
    }

    // Still tearing down: the create waits instead of starting alongside it.
    let (fresh, created) = h.registry.get_or_create(req).await.unwrap();
    assert!(created);
    assert_eq!(h.factory.max_live(), 1);

    fresh
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    h.factory
        .emit(&key, TransportEvent::CredentialsUpdated(br#"{"me":"y"}"#.to_vec()))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snap = removal.await.unwrap().unwrap();
    assert_eq!(snap.state, SessionState::Terminated);
    assert_eq!(fresh.status().state, SessionState::AwaitingLinking);
    assert_eq!(
        h.store.load(&key).await.unwrap().as_deref(),
        Some(br#"{"me":"y"}"#.as_slice())
    );
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.factory.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn pending_session_returned_unchanged() {
    let h = harness(3);
    let (first, created) = h.registry.get_or_create(pairing_request()).await.unwrap();
    assert!(created);
    first
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;

    let (second, created) = h.registry.get_or_create(pairing_request()).await.unwrap();
    assert!(!created);
    assert_eq!(second.status().pairing_code(), Some("ABCD-1234"));
    assert_eq!(h.factory.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_pairing_fails_and_is_replaced() {
    let h = harness(3);
    h.factory.pairing_code(Err(TransportError::RateLimited));
    let (handle, _) = h.registry.get_or_create(pairing_request()).await.unwrap();
    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::Failed);
    assert!(snap.last_error.unwrap().contains("too many"));

    h.factory.pairing_code(Ok("WXYZ9876".into()));
    let (fresh, created) = h.registry.get_or_create(pairing_request()).await.unwrap();
    assert!(created);
    let snap = fresh
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    assert_eq!(snap.pairing_code(), Some("WXYZ-9876"));
}

#[tokio::test(start_paused = true)]
async fn logged_out_erases_credential() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;
    h.factory
        .emit(&key, TransportEvent::CredentialsUpdated(b"{}".to_vec()))
        .await;
    h.factory
        .emit(&key, TransportEvent::Closed(DisconnectReason::LoggedOut))
        .await;

    let snap = handle.wait_for(WAIT, |s| s.state.is_terminal()).await;
    assert_eq!(snap.state, SessionState::LoggedOut);
    assert_eq!(h.store.load(&key).await.unwrap(), None);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn erase_failure_does_not_block_teardown() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    h.store.fail_erase();
    let req = qr_request();
    let key = req.key.clone();
    let (handle, _) = h.registry.get_or_create(req).await.unwrap();
    handle
        .wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;

    let snap = h.registry.remove(&key).await.unwrap();
    assert_eq!(snap.state, SessionState::Terminated);
    assert!(h.registry.get(&key).is_none());
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test]
async fn pairing_code_requires_phone() {
    let h = harness(3);
    let err = h
        .registry
        .get_or_create(CreateRequest {
            key: SessionKey::anonymous(),
            method: LinkingMethod::PairingCode,
            phone: None,
        })
        .await
        .err()
        .unwrap();
    assert_eq!(err, sl_sessions::LinkError::PhoneRequired);
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stats_count_by_phase() {
    let h = harness(3);
    h.factory.qr_on_start("2@qr-payload");
    let (a, _) = h.registry.get_or_create(qr_request()).await.unwrap();
    a.wait_for(WAIT, |s| s.state == SessionState::AwaitingLinking)
        .await;

    h.factory.pairing_code(Err(TransportError::InvalidIdentity));
    let (b, _) = h.registry.get_or_create(pairing_request()).await.unwrap();
    b.wait_for(WAIT, |s| s.state.is_terminal()).await;

    let stats = h.registry.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.finished, 1);
    assert_eq!(stats.linked, 0);

    assert_eq!(h.registry.prune_finished(Duration::from_secs(3_600)), 0);
    assert_eq!(h.registry.prune_finished(Duration::ZERO), 1);
    assert_eq!(h.registry.len(), 1);
}
