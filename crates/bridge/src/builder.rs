//! Builder for [`BridgeTransportFactory`].

use std::time::Duration;

use sl_domain::config::TransportConfig;
use sl_domain::error::{Error, Result};

use crate::factory::BridgeTransportFactory;

/// Fluent builder for [`BridgeTransportFactory`].
///
/// # Example
///
/// ```rust,no_run
/// # use sl_bridge::BridgeTransportBuilder;
/// let factory = BridgeTransportBuilder::new()
///     .bridge_url("ws://127.0.0.1:8765/link")
///     .token("secret")
///     .device_name("session-linker")
///     .build()
///     .unwrap();
/// ```
pub struct BridgeTransportBuilder {
    pub(crate) bridge_url: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) device_name: String,
    pub(crate) request_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_message_bytes: usize,
}

impl BridgeTransportBuilder {
    pub fn new() -> Self {
        Self {
            bridge_url: None,
            token: None,
            device_name: "session-linker".into(),
            request_timeout: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(30),
            max_message_bytes: 4 * 1024 * 1024, // 4 MB
        }
    }

    /// Seed the builder from the `[transport]` config section.  The token is
    /// read from the environment variable named by `token_env`.
    pub fn from_config(cfg: &TransportConfig) -> Self {
        let mut builder = Self::new()
            .device_name(cfg.device_name.clone())
            .request_timeout(Duration::from_secs(cfg.request_timeout_secs));
        builder.bridge_url = cfg.bridge_url.clone();
        builder.token = std::env::var(&cfg.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        builder
    }

    /// WebSocket URL of the bridge (e.g. `ws://127.0.0.1:8765/link`).
    pub fn bridge_url(mut self, url: impl Into<String>) -> Self {
        self.bridge_url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Device label shown on the primary device's linked-devices list.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Timeout for correlated requests (pairing code, sends).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Timeout for connect + `link_started`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Inbound frames larger than this are dropped before parsing.
    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<BridgeTransportFactory> {
        let bridge_url = self
            .bridge_url
            .ok_or_else(|| Error::Config("transport.bridge_url is not set".into()))?;
        if !(bridge_url.starts_with("ws://") || bridge_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "transport.bridge_url must be a ws:// or wss:// URL, got {bridge_url}"
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeat_interval must be greater than 0".into()));
        }

        Ok(BridgeTransportFactory {
            bridge_url,
            token: self.token,
            device_name: self.device_name,
            request_timeout: self.request_timeout,
            handshake_timeout: self.handshake_timeout,
            heartbeat_interval: self.heartbeat_interval,
            max_message_bytes: self.max_message_bytes,
        })
    }
}

impl Default for BridgeTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
