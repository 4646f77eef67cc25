//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use sl_bridge::BridgeTransportBuilder;
use sl_domain::config::{Config, ConfigSeverity};
use sl_sessions::{
    CredentialStore, FileCredentialStore, SessionDeps, SessionRegistry, TransportFactory,
};

use crate::state::AppState;

/// Validate config, open the credential store, connect the bridge factory
/// and return a fully-wired [`AppState`] plus the store the sweeper needs.
pub async fn build_app_state(
    config: Arc<Config>,
) -> anyhow::Result<(AppState, Arc<FileCredentialStore>)> {
    // ── Config validation ────────────────────────────────────────────
    check_config(&config)?;

    // ── Credential store ─────────────────────────────────────────────
    let credentials = Arc::new(
        FileCredentialStore::new(&config.credentials.dir)
            .context("initializing credential store")?,
    );

    // ── Transport ────────────────────────────────────────────────────
    let factory = build_transport(&config)?;

    // ── Session registry ─────────────────────────────────────────────
    let store: Arc<dyn CredentialStore> = credentials.clone();
    let registry = SessionRegistry::new(SessionDeps::new(factory, store, &config));
    tracing::info!(
        default_method = %config.linking.default_method,
        max_attempts = config.reconnect.max_attempts,
        cleanup_grace_secs = config.delivery.cleanup_grace_secs,
        "session registry ready"
    );

    // ── Tokens (read once, hash for constant-time comparison) ───────
    let mut state = AppState::new(config.clone(), registry);
    state.api_token_hash = token_hash(&config.server.api_token_env, "API");
    state.admin_token_hash = token_hash(&config.admin.token_env, "admin");

    Ok((state, credentials))
}

/// Log every config issue and refuse to start on errors.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn TransportFactory>> {
    if config.transport.bridge_url.is_none() {
        anyhow::bail!("transport.bridge_url is not set; sessions cannot be linked without a bridge");
    }
    let factory = BridgeTransportBuilder::from_config(&config.transport)
        .build()
        .context("building bridge transport")?;
    tracing::info!(bridge_url = %factory.bridge_url(), "bridge transport ready");
    Ok(Arc::new(factory))
}

/// SHA-256 of the token held in `env_var`, or `None` (auth disabled) when
/// the variable is unset or empty.
pub fn token_hash(env_var: &str, label: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::info!(source = %format!("env:{env_var}"), "{label} bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!("{label} bearer-token auth DISABLED, set the {env_var} env var");
            None
        }
    }
}

/// Spawn the periodic maintenance loop.  It stops when `state.shutdown`
/// is cancelled.
pub fn spawn_background_tasks(state: &AppState, credentials: Arc<FileCredentialStore>) {
    let interval_secs = state.config.credentials.sweep_interval_secs;
    if interval_secs == 0 {
        tracing::info!("stale credential sweep disabled (credentials.sweep_interval_secs = 0)");
        return;
    }

    // ── Stale credential sweep + finished-session pruning ────────────
    let registry = state.registry.clone();
    let shutdown = state.shutdown.clone();
    let max_age = Duration::from_secs(state.config.credentials.max_age_secs);
    tokio::spawn(async move {
        // The first tick fires immediately, so leftovers from a previous
        // run are swept at startup.
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    run_maintenance(&registry, &credentials, max_age).await;
                }
            }
        }
        tracing::debug!("maintenance loop stopped");
    });
}

/// One maintenance pass: delete credential files older than `max_age` that
/// no live session owns, and forget finished sessions that have been idle as
/// long.
pub async fn run_maintenance(
    registry: &SessionRegistry,
    credentials: &FileCredentialStore,
    max_age: Duration,
) -> usize {
    let removed = match credentials.sweep_stale(max_age, &registry.live_keys()).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "stale credential sweep failed");
            0
        }
    };
    let pruned = registry.prune_finished(max_age);
    if removed > 0 || pruned > 0 {
        tracing::info!(removed, pruned, "maintenance pass complete");
    }
    removed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
