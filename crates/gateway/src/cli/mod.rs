pub mod config;
pub mod pid;

use anyhow::Context;
use clap::{Parser, Subcommand};

/// session-linker: links a device to a messaging account and hands the
/// resulting credential back to it.
#[derive(Debug, Parser)]
#[command(name = "session-linker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `SL_CONFIG` (or
/// `config.toml` by default).  A missing file yields the defaults.
/// Returns the parsed [`Config`](sl_domain::config::Config) and the path
/// that was used.
pub fn load_config() -> anyhow::Result<(sl_domain::config::Config, String)> {
    let config_path = std::env::var("SL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(std::path::Path::new(&config_path))?;
    Ok((config, config_path))
}

pub fn load_config_from(path: &std::path::Path) -> anyhow::Result<sl_domain::config::Config> {
    if !path.exists() {
        return Ok(sl_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
