use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding one `<session_key>.json` file per live session.
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    /// How often the stale-credential sweeper runs.  `0` disables it.
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Credential files older than this are deleted by the sweeper.
    #[serde(default = "d_max_age")]
    pub max_age_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: d_dir(),
            sweep_interval_secs: d_sweep_interval(),
            max_age_secs: d_max_age(),
        }
    }
}

fn d_dir() -> PathBuf {
    PathBuf::from("./data/sessions")
}
fn d_sweep_interval() -> u64 {
    3_600
}
fn d_max_age() -> u64 {
    3_600
}
