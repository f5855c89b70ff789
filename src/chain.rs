//! Service chain
//!
//! Owns the ordered list of [`ServiceNode`]s (outer to inner) and the single
//! connection they all ride on. Parent/child relations are indexes into the
//! node list, and the connection lives in one slot that is lent to exactly
//! one node at a time.
//!
//! ```text
//!  index:     0                 1                2
//!          ┌───────┐  child  ┌───────┐  child  ┌────────┐
//!          │  ssh  │ ──────▶ │ sudo  │ ──────▶ │ mysql  │
//!          │direct │ ◀────── │ shell │ ◀────── │ shell  │
//!          └───────┘ parent  └───────┘ parent  └────────┘
//!              │
//!              ▼ spawns, owns and finally closes
//!        Box<dyn Connection>
//! ```

use std::time::Duration;

use crate::connection::{Connection, RelayExit, Spawner, Terminal};
use crate::error::{ProvisionError, Result};
use crate::service::{Capability, LoginContext, NodeState, OperationMode, ServiceNode};
use crate::target::Hop;

pub struct ServiceChain {
    nodes: Vec<ServiceNode>,
    connection: Option<Box<dyn Connection>>,
}

impl ServiceChain {
    /// Wire `nodes`, given outer to inner, into a chain
    pub fn new(mut nodes: Vec<ServiceNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ProvisionError::Chain("a chain needs at least one service".to_string()));
        }

        let last = nodes.len() - 1;
        for (index, node) in nodes.iter_mut().enumerate() {
            node.parent = index.checked_sub(1);
            node.child = (index < last).then_some(index + 1);
        }

        Ok(Self {
            nodes,
            connection: None,
        })
    }

    /// Build a chain from resolved hops
    pub fn from_hops(hops: impl IntoIterator<Item = Hop>, default_timeout: Duration) -> Result<Self> {
        let nodes = hops
            .into_iter()
            .map(|hop| ServiceNode::from_hop(hop, default_timeout))
            .collect::<Result<Vec<_>>>()?;
        Self::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ServiceNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ServiceNode> {
        self.nodes.get(index)
    }

    /// The innermost link, the one the user ends up in
    pub fn leaf(&self) -> &ServiceNode {
        &self.nodes[self.leaf_index()]
    }

    pub fn leaf_index(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Whether the chain currently holds a live connection
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Path from `index` outward to the root, `index` first
    pub fn ancestors(&self, index: usize) -> Vec<&ServiceNode> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(index);
        while let Some(node) = current {
            path.push(node);
            current = node.parent().and_then(|p| self.nodes.get(p));
        }
        path
    }

    /// Negotiate the whole chain, starting from the innermost link
    pub fn negotiate(&mut self) -> Result<()> {
        self.required(self.leaf_index(), None)
    }

    /// Ask the link at `index` for `wanted`, recursing towards the root.
    ///
    /// Every link on the path is planned first; modes and capabilities are
    /// only committed when the whole path agrees.
    pub fn required(&mut self, index: usize, wanted: Option<Capability>) -> Result<()> {
        let mut plans = Vec::new();
        let mut request = Some((index, wanted));

        while let Some((current, wanted)) = request {
            let node = self.nodes.get(current).ok_or_else(|| {
                ProvisionError::Chain(format!("no service at position {}", current))
            })?;
            if node.state() != NodeState::Created {
                return Err(ProvisionError::Chain(format!(
                    "{} was already negotiated",
                    node.display_label()
                )));
            }

            let plan = node.plan(wanted).inspect_err(|e| {
                tracing::warn!("Negotiation failed at {}: {}", node.display_label(), e);
            })?;
            request = plan
                .from_parent
                .and_then(|cap| node.parent().map(|parent| (parent, Some(cap))));
            plans.push((current, plan));
        }

        for (current, plan) in plans {
            self.nodes[current].settle(plan);
        }
        Ok(())
    }

    /// Log every link in, root to leaf
    pub fn prework(&mut self, spawner: &dyn Spawner) -> Result<()> {
        for index in 0..self.nodes.len() {
            let result = self.prework_node(index, spawner);
            let node = &mut self.nodes[index];
            match result {
                Ok(()) => {
                    tracing::info!("{} connected", node.display_label());
                    node.set_state(NodeState::Connected);
                }
                Err(e) => {
                    tracing::warn!("Prework failed at {}: {}", node.display_label(), e);
                    node.set_state(NodeState::Failed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn prework_node(&mut self, index: usize, spawner: &dyn Spawner) -> Result<()> {
        let node = &self.nodes[index];
        if node.state() != NodeState::Negotiated {
            return Err(ProvisionError::Chain(format!(
                "{} must be negotiated before prework",
                node.display_label()
            )));
        }
        let mode = node.operation_mode().ok_or_else(|| {
            ProvisionError::Chain(format!("{} has no operation mode", node.display_label()))
        })?;

        let command = node.protocol().command(node.target())?;
        match mode {
            OperationMode::Direct => {
                if self.connection.is_some() {
                    return Err(ProvisionError::Chain(
                        "a chain can only spawn one connection".to_string(),
                    ));
                }
                tracing::info!("{}: spawning `{}`", node.display_label(), command.program);
                self.connection = Some(spawner.spawn(&command)?);
            }
            OperationMode::ThroughShell => {
                let cnx = self.connection.as_deref_mut().ok_or_else(|| {
                    ProvisionError::Chain(format!(
                        "{} needs its parent's shell, which is not open",
                        node.display_label()
                    ))
                })?;
                tracing::info!("{}: sending `{}` to the parent shell", node.display_label(), command);
                cnx.send_line(&command.to_line())?;
            }
            OperationMode::ThroughForwardedPort => {
                return Err(ProvisionError::Unsupported(
                    "connecting through a forwarded port".to_string(),
                ));
            }
        }

        let ctx = LoginContext {
            target: node.target(),
            secret: node.secret(),
            parent_secret: node.parent().map(|parent| self.nodes[parent].secret()),
            timeout: node.timeout(),
            mode,
        };
        let cnx = self
            .connection
            .as_deref_mut()
            .ok_or_else(|| ProvisionError::Chain("connection vanished during prework".to_string()))?;
        node.protocol().login(cnx, &ctx)
    }

    /// Give the user the innermost link until they detach or it exits
    pub fn interact(&mut self, terminal: &dyn Terminal, escape: u8) -> Result<RelayExit> {
        let leaf = self.leaf_index();
        let protocol = self.nodes[leaf].protocol();
        if self.nodes[leaf].state() != NodeState::Connected {
            return Err(ProvisionError::Chain(format!(
                "{} is not connected",
                self.nodes[leaf].display_label()
            )));
        }
        let cnx = self
            .connection
            .as_deref_mut()
            .ok_or_else(|| ProvisionError::Chain("no live connection to interact with".to_string()))?;

        cnx.resize(terminal.size()?)?;
        let watch = terminal.watch_resize()?;
        self.nodes[leaf].set_state(NodeState::Interacting);

        let mut poll_resize = || {
            if !watch.take_pending() {
                return None;
            }
            match terminal.size() {
                Ok(size) => Some(size),
                Err(e) => {
                    tracing::warn!("Failed to read terminal size: {}", e);
                    None
                }
            }
        };
        let outcome = cnx.relay(escape, &mut poll_resize);
        drop(watch);
        self.nodes[leaf].set_state(NodeState::Connected);

        match &outcome {
            Ok(RelayExit::Detached) => {
                cnx.note(&format!("\r\n[vault] Escaped from {}, calling postwork.\r\n", protocol))
            }
            Ok(RelayExit::ProcessExited) => {
                cnx.note(&format!("\r\n[vault] {} disconnected\r\n", protocol))
            }
            Err(e) => tracing::warn!("Interactive session ended with an error: {}", e),
        }
        outcome
    }

    /// Tear down leaf to root; only the parentless link closes the connection
    pub fn postwork(&mut self) -> Result<()> {
        let mut result = Ok(());
        for node in self.nodes.iter_mut().rev() {
            if node.parent().is_none() {
                if let Some(mut cnx) = self.connection.take() {
                    tracing::info!("{}: closing connection", node.display_label());
                    result = cnx.close();
                }
            }
            node.set_state(NodeState::Closed);
        }
        result
    }

    /// Close whatever the root opened after a failed prework
    pub fn abort(&mut self) {
        if let Some(mut cnx) = self.connection.take() {
            tracing::info!("Aborting chain, closing connection");
            if let Err(e) = cnx.close() {
                tracing::warn!("Failed to close connection: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ServiceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceChain")
            .field("nodes", &self.nodes)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}
