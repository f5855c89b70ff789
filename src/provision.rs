//! Provisioning driver
//!
//! Runs one chain end to end: negotiate, prework, interact, postwork.

use std::sync::Arc;

use crate::chain::ServiceChain;
use crate::config::{ConfigStorage, ProvisionConfig};
use crate::connection::{ControllingTerminal, PtySpawner, RelayExit, Spawner, Terminal};
use crate::error::{ProvisionError, Result};
use crate::target::Hop;

pub struct Provisioner {
    config: ProvisionConfig,
    spawner: Box<dyn Spawner>,
    terminal: Box<dyn Terminal>,
}

impl Provisioner {
    /// Spawn under a real PTY and relay the controlling terminal
    pub fn new(config: ProvisionConfig) -> Self {
        let spawner = PtySpawner::from_config(&config);
        Self::with_parts(config, Box::new(spawner), Box::new(ControllingTerminal))
    }

    /// Like [`Provisioner::new`], with the settings read from `storage`
    pub async fn from_storage(storage: &ConfigStorage) -> Result<Self> {
        let config = storage.load().await?;
        tracing::info!("Using provisioning settings from {:?}", storage.path());
        Ok(Self::new(config))
    }

    pub fn with_parts(
        config: ProvisionConfig,
        spawner: Box<dyn Spawner>,
        terminal: Box<dyn Terminal>,
    ) -> Self {
        Self {
            config,
            spawner,
            terminal,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Build a chain from `hops` and run it
    pub fn run_hops(&self, hops: Vec<Hop>) -> Result<RelayExit> {
        let chain = ServiceChain::from_hops(hops, self.config.default_timeout())?;
        self.run(chain)
    }

    /// Drive `chain` through its whole lifecycle
    ///
    /// A failed prework closes whatever was opened and returns the error.
    /// Postwork runs after interact whether or not the session ended cleanly.
    pub fn run(&self, mut chain: ServiceChain) -> Result<RelayExit> {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("provision", run_id = %run_id, leaf = %chain.leaf().display_label());
        let _enter = span.enter();

        tracing::info!("Provisioning chain of {} service(s)", chain.len());
        chain.negotiate()?;

        if let Err(e) = chain.prework(self.spawner.as_ref()) {
            chain.abort();
            return Err(e);
        }

        let outcome = chain.interact(self.terminal.as_ref(), self.config.escape);
        let closed = chain.postwork();

        let exit = outcome?;
        closed?;
        tracing::info!("Provisioning finished: {:?}", exit);
        Ok(exit)
    }

    /// Run on the blocking pool of the current tokio runtime
    pub async fn run_blocking_task(self: Arc<Self>, chain: ServiceChain) -> Result<RelayExit> {
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| self.run(chain)))
            .await
            .map_err(|e| ProvisionError::Chain(format!("provisioning task failed: {}", e)))?
    }
}
