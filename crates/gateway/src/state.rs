use std::sync::Arc;
use std::time::Instant;

use sl_domain::config::Config;
use sl_sessions::{PhoneRules, SessionRegistry};
use tokio_util::sync::CancellationToken;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    /// Phone bounds derived from `[linking]`, used by request validation.
    pub phone_rules: PhoneRules,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 hash of the admin bearer token (read once at startup).
    /// `None` = dev mode (admin endpoints accessible without auth).
    pub admin_token_hash: Option<Vec<u8>>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    /// Cancelled once the server stops; background loops watch it.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// State with auth disabled.  Callers set the token hashes afterwards
    /// when tokens are configured.
    pub fn new(config: Arc<Config>, registry: SessionRegistry) -> Self {
        let phone_rules = PhoneRules::from(&config.linking);
        Self {
            config,
            registry,
            phone_rules,
            api_token_hash: None,
            admin_token_hash: None,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}
