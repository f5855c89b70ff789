//! vault-provision - automated logins through chains of remote services
//!
//! Given an ordered list of hops (an ssh bastion, a `sudo` elevation, a
//! database console...), negotiates how each link reaches the next, drives
//! every login prompt with the secrets it was handed, then gives the user
//! the innermost session.
//!
//! ```no_run
//! use vault_provision::{Hop, ProvisionConfig, Provisioner};
//!
//! # fn main() -> vault_provision::Result<()> {
//! vault_provision::init_logging();
//! let hops = vec![
//!     Hop::parse("ssh://admin@bastion", "bastion-password")?,
//!     Hop::parse("sudo://", "")?,
//!     Hop::parse("mysql://app@localhost/shop", "db-password")?,
//! ];
//! Provisioner::new(ProvisionConfig::default()).run_hops(hops)?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod connection;
pub mod error;
pub mod expect;
pub mod provision;
pub mod service;
pub mod target;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use chain::ServiceChain;
pub use config::{ConfigStorage, ProvisionConfig};
pub use connection::{Connection, RelayExit, Spawner, Terminal, WindowSize};
pub use error::{ProvisionError, Result};
pub use provision::Provisioner;
pub use service::{Capability, NodeState, OperationMode, Protocol, ServiceNode};
pub use target::{Hop, Secret, TargetDescriptor};

/// Install the global subscriber
///
/// Logs go to stderr so they never mix with the session on stdout.
/// `RUST_LOG` overrides the default `info` level. Calling it twice is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
