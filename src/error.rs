//! Provisioning error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Negotiation found a link that cannot serve what its child asked for
    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    ExpectTimeout {
        timeout: Duration,
        waiting_for: String,
    },

    /// An explicit failure banner matched (`Sorry`, `ERROR 1045`, ...)
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The chain was driven out of order or its invariants were broken
    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProvisionError::ExpectTimeout { .. })
    }
}

impl From<url::ParseError> for ProvisionError {
    fn from(err: url::ParseError) -> Self {
        ProvisionError::InvalidTarget(err.to_string())
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
