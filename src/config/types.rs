//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::WindowSize;

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_timeout_secs() -> u64 {
    45
}

/// `Ctrl-]`
fn default_escape() -> u8 {
    0x1d
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

/// Provisioning settings, persisted as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Per-hop expect timeout, unless the hop sets its own
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Byte that detaches the user from the interactive session
    #[serde(default = "default_escape")]
    pub escape: u8,

    #[serde(default = "default_cols")]
    pub initial_cols: u16,

    #[serde(default = "default_rows")]
    pub initial_rows: u16,

    /// `TERM` exported to the spawned program
    #[serde(default = "default_term")]
    pub term: String,
}

impl ProvisionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// PTY size used until the real terminal size is known
    pub fn initial_size(&self) -> WindowSize {
        WindowSize {
            rows: self.initial_rows,
            cols: self.initial_cols,
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            timeout_secs: default_timeout_secs(),
            escape: default_escape(),
            initial_cols: default_cols(),
            initial_rows: default_rows(),
            term: default_term(),
        }
    }
}
