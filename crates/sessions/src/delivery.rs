//! Post-link credential hand-over.
//!
//! Runs each time a session links: send the stored credential to the linked
//! identity as a document, then a confirmation text.  Failures are reported,
//! never retried, and never stop the session from being cleaned up
//! afterwards.

use std::sync::Arc;

use chrono::Utc;
use sl_domain::config::DeliveryConfig;
use sl_domain::trace::TraceEvent;

use crate::credentials::CredentialStore;
use crate::session_key::SessionKey;
use crate::transport::{Document, TransportClient};

const CREDENTIAL_MIME: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStep {
    Document,
    Confirmation,
}

impl DeliveryStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Confirmation => "confirmation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Document and confirmation both sent.
    Delivered,
    /// The store had no usable credential.
    NothingToDeliver,
    Failed { step: DeliveryStep, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    pub bytes: usize,
    /// Whether the failure notice reached the user (failures only).
    pub failure_notified: bool,
}

pub struct DeliveryOrchestrator {
    store: Arc<dyn CredentialStore>,
    config: DeliveryConfig,
}

impl DeliveryOrchestrator {
    pub fn new(store: Arc<dyn CredentialStore>, config: DeliveryConfig) -> Self {
        Self { store, config }
    }

    pub async fn deliver(
        &self,
        client: &dyn TransportClient,
        key: &SessionKey,
        identity: &str,
    ) -> DeliveryReport {
        let bytes = match self.store.load(key).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                tracing::warn!(session_key = %key, "no credential stored, nothing to deliver");
                return DeliveryReport {
                    outcome: DeliveryOutcome::NothingToDeliver,
                    bytes: 0,
                    failure_notified: false,
                };
            }
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "credential load failed");
                return DeliveryReport {
                    outcome: DeliveryOutcome::NothingToDeliver,
                    bytes: 0,
                    failure_notified: false,
                };
            }
        };
        let len = bytes.len();

        let doc = Document {
            bytes,
            file_name: format!("{}-{}.json", self.config.file_name_prefix, key),
            mime_type: CREDENTIAL_MIME.into(),
            caption: caption(key),
        };

        // The confirmation is only attempted once the document send resolved.
        let result = match client.send_document(identity, doc).await {
            Ok(()) => client
                .send_text(identity, &self.config.confirmation_text)
                .await
                .map_err(|e| (DeliveryStep::Confirmation, e)),
            Err(e) => Err((DeliveryStep::Document, e)),
        };

        match result {
            Ok(()) => {
                TraceEvent::CredentialDelivered {
                    session_key: key.to_string(),
                    bytes: len,
                    confirmed: true,
                }
                .emit();
                DeliveryReport {
                    outcome: DeliveryOutcome::Delivered,
                    bytes: len,
                    failure_notified: false,
                }
            }
            Err((step, error)) => {
                TraceEvent::DeliveryFailed {
                    session_key: key.to_string(),
                    step: step.as_str().into(),
                    error: error.to_string(),
                }
                .emit();
                let failure_notified = match client
                    .send_text(identity, &self.config.failure_text)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(session_key = %key, error = %e, "failure notice not sent");
                        false
                    }
                };
                DeliveryReport {
                    outcome: DeliveryOutcome::Failed {
                        step,
                        error: error.to_string(),
                    },
                    bytes: len,
                    failure_notified,
                }
            }
        }
    }
}

fn caption(key: &SessionKey) -> String {
    let who = match key.phone_digits() {
        Some(d) => format!("+{d}"),
        None => key.to_string(),
    };
    format!(
        "Session credential for {who}\nGenerated {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
