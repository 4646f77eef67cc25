//! Device-linking session lifecycle.
//!
//! One session per key walks a device through the pairing handshake (QR code
//! or numeric pairing code), hands the resulting credential back to the
//! linked account, and then tears itself down.  Each session is an actor:
//! transport events, timers and HTTP-originated commands all enter a single
//! queue, and [`machine::SessionMachine`] is the only code that mutates
//! session state.  The [`SessionRegistry`] owns the key → session mapping.

pub mod actor;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod machine;
pub mod policy;
pub mod registry;
pub mod session_key;
pub mod state;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actor::SessionDeps;
pub use credentials::{CredentialStore, EraseOutcome, FileCredentialStore};
pub use delivery::{DeliveryOrchestrator, DeliveryOutcome, DeliveryReport, DeliveryStep};
pub use error::LinkError;
pub use machine::MachineSettings;
pub use policy::{DisconnectReason, ReconnectDecision, ReconnectPolicy};
pub use registry::{CreateRequest, RegistryStats, SessionHandle, SessionRegistry};
pub use session_key::{PhoneNumber, PhoneRules, SessionKey};
pub use state::{ArtifactKind, LinkingArtifact, SessionState, StatusSnapshot};
pub use transport::{
    Document, StartRequest, StartedTransport, TransportClient, TransportError, TransportEvent,
    TransportFactory,
};
