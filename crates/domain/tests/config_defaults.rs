use sl_domain::config::{Config, LinkingMethod};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config.server.cors.allowed_origins.contains(&"http://localhost:*".to_string()));
    assert!(config.server.cors.allowed_origins.contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn admin_token_env_default() {
    let config = Config::default();
    assert_eq!(config.admin.token_env, "SL_ADMIN_TOKEN");
}

#[test]
fn linking_defaults_match_handshake_limits() {
    let config = Config::default();
    assert_eq!(config.linking.default_method, LinkingMethod::Qr);
    assert_eq!(config.linking.pairing_code_group, 4);
    assert_eq!(config.linking.min_phone_digits, 10);
    assert_eq!(config.linking.max_phone_digits, 15);
}

#[test]
fn delivery_grace_defaults_to_ten_seconds() {
    let config = Config::default();
    assert_eq!(config.delivery.cleanup_grace_secs, 10);
    assert!(!config.delivery.confirmation_text.is_empty());
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
port = 8080

[linking]
default_method = "pairing_code"

[reconnect]
base_delay_ms = 500
max_delay_ms = 4000
max_attempts = 5

[delivery]
cleanup_grace_secs = 5

[credentials]
dir = "/var/lib/linker"
max_age_secs = 600

[transport]
bridge_url = "ws://127.0.0.1:8765/link"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.linking.default_method, LinkingMethod::PairingCode);
    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.delivery.cleanup_grace_secs, 5);
    assert_eq!(config.credentials.max_age_secs, 600);
    assert_eq!(
        config.transport.bridge_url.as_deref(),
        Some("ws://127.0.0.1:8765/link")
    );
    assert!(config
        .validate()
        .iter()
        .all(|i| i.severity == sl_domain::config::ConfigSeverity::Warning));
}
