//! `[server]`: where the HTTP surface listens and how it is guarded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Env var holding the bearer token for `/session/auth` and the
    /// per-session routes.  Unset or empty leaves them open.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Cap on in-flight requests.  A pending `/session/auth` call holds its
    /// slot until the session shows an artifact or the request times out.
    #[serde(default = "d_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Per-IP limit.  Every new session costs a round trip to the messaging
    /// network, so exposed deployments should set one.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            max_concurrent_requests: d_max_concurrent_requests(),
            rate_limit: None,
            pid_file: None,
        }
    }
}

/// Token bucket per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, or `scheme://host:*` for any port on a host.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    /// A lone `"*"` entry.
    pub fn allows_any(&self) -> bool {
        matches!(self.allowed_origins.as_slice(), [only] if only == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3000
}
fn d_api_token_env() -> String {
    "SL_API_TOKEN".into()
}
fn d_max_concurrent_requests() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
