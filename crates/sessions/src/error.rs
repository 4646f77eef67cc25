/// Errors surfaced to callers of the session registry.
///
/// Transport and storage failures never appear here: the session absorbs
/// them and reflects the outcome in its state and `last_error`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("invalid session id: {0}")]
    InvalidSessionKey(String),

    #[error("unsupported linking method: {0}")]
    UnsupportedMethod(String),

    #[error("phone number is required for pairing-code linking")]
    PhoneRequired,

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session actor has shut down")]
    ActorShutdown,
}
