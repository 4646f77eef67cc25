use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Linking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a device is linked to the account.  Fixed at session creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkingMethod {
    /// Scan a QR code from the primary device.
    #[default]
    Qr,
    /// Type a numeric pairing code on the primary device.
    #[serde(alias = "code")]
    PairingCode,
}

impl LinkingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::PairingCode => "pairing_code",
        }
    }

    /// Parse the `mode` query value used by HTTP callers (`qr` | `code`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "qr" => Some(Self::Qr),
            "code" | "pairing_code" | "pairing-code" => Some(Self::PairingCode),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Method used when the caller does not pass one.
    #[serde(default)]
    pub default_method: LinkingMethod,
    /// Pairing codes are displayed in dash-separated groups of this size.
    #[serde(default = "d_group")]
    pub pairing_code_group: usize,
    /// Minimum digits in a phone identity (country code included).
    #[serde(default = "d_min_digits")]
    pub min_phone_digits: usize,
    /// Maximum digits in a phone identity (country code included).
    #[serde(default = "d_max_digits")]
    pub max_phone_digits: usize,
    /// Upper bound on how long a create request waits for its first status.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            default_method: LinkingMethod::Qr,
            pairing_code_group: d_group(),
            min_phone_digits: d_min_digits(),
            max_phone_digits: d_max_digits(),
            request_timeout_secs: d_request_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reconnection back-off for transient transport drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay unit; attempt `n` waits `n * base_delay_ms`.
    #[serde(default = "d_base_delay")]
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    #[serde(default = "d_max_delay")]
    pub max_delay_ms: u64,
    /// Transient drops tolerated per linking attempt.  The drop that brings
    /// the counter to this value fails the session instead of retrying.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay(),
            max_delay_ms: d_max_delay(),
            max_attempts: d_max_attempts(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What gets sent to the linked identity once linking succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Seconds between the last send and transport teardown.
    #[serde(default = "d_grace")]
    pub cleanup_grace_secs: u64,
    /// File name prefix for the credential document.
    #[serde(default = "d_file_prefix")]
    pub file_name_prefix: String,
    /// Sent after the credential document.
    #[serde(default = "d_confirmation")]
    pub confirmation_text: String,
    /// Sent (best effort) when the document or confirmation could not be sent.
    #[serde(default = "d_failure")]
    pub failure_text: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cleanup_grace_secs: d_grace(),
            file_name_prefix: d_file_prefix(),
            confirmation_text: d_confirmation(),
            failure_text: d_failure(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the protocol bridge lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket URL of the protocol bridge (e.g. `ws://127.0.0.1:8765/link`).
    #[serde(default)]
    pub bridge_url: Option<String>,
    /// Environment variable holding the bridge auth token.
    #[serde(default = "d_bridge_token_env")]
    pub token_env: String,
    /// Device label announced during linking.
    #[serde(default = "d_device_name")]
    pub device_name: String,
    /// Timeout for bridge request/response round trips.
    #[serde(default = "d_bridge_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bridge_url: None,
            token_env: d_bridge_token_env(),
            device_name: d_device_name(),
            request_timeout_secs: d_bridge_timeout(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_group() -> usize {
    4
}
fn d_min_digits() -> usize {
    10
}
fn d_max_digits() -> usize {
    15
}
fn d_request_timeout() -> u64 {
    30
}
fn d_base_delay() -> u64 {
    2_000
}
fn d_max_delay() -> u64 {
    10_000
}
fn d_max_attempts() -> u32 {
    3
}
fn d_grace() -> u64 {
    10
}
fn d_file_prefix() -> String {
    "linked-session".into()
}
fn d_confirmation() -> String {
    "Your device was linked. The attached file holds the session credential: \
     keep it private and never share it with anyone."
        .into()
}
fn d_failure() -> String {
    "Your device was linked, but the session credential could not be delivered. \
     Please request a new session."
        .into()
}
fn d_bridge_token_env() -> String {
    "SL_BRIDGE_TOKEN".into()
}
fn d_device_name() -> String {
    "session-linker".into()
}
fn d_bridge_timeout() -> u64 {
    20
}
