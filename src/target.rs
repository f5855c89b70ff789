//! Resolved chain inputs
//!
//! The vault resolves every hop of a chain before the engine starts: where
//! to connect ([`TargetDescriptor`]), the already-decrypted [`Secret`] and an
//! optional per-hop timeout. Those three travel together as a [`Hop`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use crate::error::{ProvisionError, Result};

/// Where a single link of the chain points to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Service type tag (`ssh`, `sudo`, `mysql`, ...)
    pub scheme: String,
    /// Host name, empty for links that run on their parent's host (`sudo://`)
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Path component, e.g. `/shop` for a database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl TargetDescriptor {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            username: None,
            path: None,
        }
    }

    /// Parse a vault service location such as `ssh://root@bastion:2222`
    /// or `mysql://app@db/shop`.
    pub fn parse(location: &str) -> Result<Self> {
        let url = Url::parse(location)?;

        let username = match url.username() {
            "" => None,
            name => Some(name.to_string()),
        };
        let path = match url.path() {
            "" | "/" => None,
            path => Some(path.to_string()),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
            username,
            path,
        })
    }

    pub fn with_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Label used in logs and transcript notes
    pub fn display_label(&self) -> String {
        match (&self.username, self.host.is_empty()) {
            (Some(user), false) => format!("{}://{}@{}", self.scheme, user, self.host),
            (None, false) => format!("{}://{}", self.scheme, self.host),
            (_, true) => format!("{}://", self.scheme),
        }
    }
}

/// A decrypted password or passphrase
///
/// The plaintext is wiped from memory when the last copy is dropped and is
/// never rendered by `Debug`.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self(Zeroizing::new(plaintext.into()))
    }

    /// Borrow the plaintext, only to write it into the live stream
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret::new(value)
    }
}

/// One resolved entry of a chain, outer to inner
#[derive(Debug, Clone)]
pub struct Hop {
    pub target: TargetDescriptor,
    pub secret: Secret,
    /// Overrides the configured prompt timeout for this hop only
    pub timeout: Option<Duration>,
}

impl Hop {
    pub fn new(target: TargetDescriptor, secret: impl Into<Secret>) -> Self {
        Self {
            target,
            secret: secret.into(),
            timeout: None,
        }
    }

    /// Build a hop straight from a service URL
    pub fn parse(location: &str, secret: impl Into<Secret>) -> Result<Self> {
        Ok(Self::new(TargetDescriptor::parse(location)?, secret))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_location() {
        let target = TargetDescriptor::parse("ssh://admin@bastion.example.org:2222").unwrap();
        assert_eq!(target.scheme, "ssh");
        assert_eq!(target.host, "bastion.example.org");
        assert_eq!(target.port, Some(2222));
        assert_eq!(target.username.as_deref(), Some("admin"));
        assert_eq!(target.path, None);
    }

    #[test]
    fn test_parse_database_path() {
        let target = TargetDescriptor::parse("mysql://app@db/shop").unwrap();
        assert_eq!(target.scheme, "mysql");
        assert_eq!(target.host, "db");
        assert_eq!(target.path.as_deref(), Some("/shop"));
        assert_eq!(target.port, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = TargetDescriptor::parse("not a url").unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTarget(_)));
    }

    #[test]
    fn test_display_label() {
        let target = TargetDescriptor::new("ssh", "h").with_user("u");
        assert_eq!(target.display_label(), "ssh://u@h");
        assert_eq!(TargetDescriptor::new("sudo", "").display_label(), "sudo://");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");

        let hop = Hop::new(TargetDescriptor::new("ssh", "h"), "hunter2");
        assert!(!format!("{:?}", hop).contains("hunter2"));
    }
}
