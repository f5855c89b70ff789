//! Service nodes
//!
//! A [`ServiceNode`] is one link of an access chain: an ssh hop, a `sudo`
//! elevation, a database console. Each [`Protocol`] declares the closed
//! set of capabilities it can hand to a child and knows how to log in:
//! which command starts it and which prompts to answer.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──negotiate──▶ Negotiated ──prework──▶ Connected ◀──▶ Interacting
//!                                        │                │
//!                                        ▼                ▼
//!                                      Failed          Closed
//! ```

mod mysql;
mod prompts;
mod ssh;
mod su;
mod sudo;
mod vnc;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{CommandLine, Connection};
use crate::error::{ProvisionError, Result};
use crate::target::{Hop, Secret, TargetDescriptor};

pub use prompts::{
    HOST_KEY_PROMPT, LOGIN_BANNER, MYSQL_ERROR, MYSQL_PROMPT, PASSWORD_PROMPT, SHELL_PROMPT,
    SORRY,
};

/// What a link can expose to the link nested inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ShellAccess,
    PortForward,
    DatabaseConsole,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ShellAccess => "shell-access",
            Capability::PortForward => "port-forward",
            Capability::DatabaseConsole => "database-console",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a link obtains its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// Spawn a fresh process
    Direct,
    /// Type the login command into the parent's open shell
    ThroughShell,
    /// Connect to a port the parent tunnelled. Reserved: never negotiated.
    ThroughForwardedPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Created,
    Negotiated,
    Connected,
    Interacting,
    Closed,
    Failed,
}

/// Supported service types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Sudo,
    Su,
    Mysql,
    Vnc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Sudo => "sudo",
            Protocol::Su => "su",
            Protocol::Mysql => "mysql",
            Protocol::Vnc => "vnc",
        }
    }

    /// Capabilities a child may ask of this link
    pub fn provides(&self) -> &'static [Capability] {
        match self {
            Protocol::Ssh => &[Capability::ShellAccess, Capability::PortForward],
            Protocol::Sudo | Protocol::Su => &[Capability::ShellAccess],
            Protocol::Mysql => &[Capability::DatabaseConsole],
            Protocol::Vnc => &[],
        }
    }

    /// What the link exposes when nobody asked for anything in particular
    pub fn default_capability(&self) -> Option<Capability> {
        self.provides().first().copied()
    }

    /// `sudo` and `mysql` only exist inside a shell
    pub fn needs_parent(&self) -> bool {
        matches!(self, Protocol::Sudo | Protocol::Mysql)
    }

    pub(crate) fn command(&self, target: &TargetDescriptor) -> Result<CommandLine> {
        match self {
            Protocol::Ssh => Ok(ssh::command(target)),
            Protocol::Sudo => Ok(sudo::command()),
            Protocol::Su => Ok(su::command(target)),
            Protocol::Mysql => Ok(mysql::command(target)),
            Protocol::Vnc => vnc::command(target),
        }
    }

    pub(crate) fn login(&self, cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
        match self {
            Protocol::Ssh => ssh::login(cnx, ctx),
            Protocol::Sudo => sudo::login(cnx, ctx),
            Protocol::Su => su::login(cnx, ctx),
            Protocol::Mysql => mysql::login(cnx, ctx),
            Protocol::Vnc => vnc::login(cnx, ctx),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Protocol::Ssh),
            "sudo" => Ok(Protocol::Sudo),
            "su" => Ok(Protocol::Su),
            "mysql" => Ok(Protocol::Mysql),
            "vnc" => Ok(Protocol::Vnc),
            other => Err(ProvisionError::Unsupported(format!(
                "no provisioning logic for `{}` services",
                other
            ))),
        }
    }
}

/// Everything a protocol handler sees while logging in
pub(crate) struct LoginContext<'a> {
    pub target: &'a TargetDescriptor,
    pub secret: &'a Secret,
    /// The parent's secret, reused by `sudo`
    pub parent_secret: Option<&'a Secret>,
    pub timeout: Duration,
    pub mode: OperationMode,
}

/// Outcome of negotiating one link, committed once the whole path agrees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkPlan {
    pub mode: OperationMode,
    pub provided: Option<Capability>,
    /// What the parent must provide in turn
    pub from_parent: Option<Capability>,
}

/// One link of an access chain
#[derive(Debug)]
pub struct ServiceNode {
    protocol: Protocol,
    target: TargetDescriptor,
    secret: Secret,
    timeout: Duration,
    pub(crate) parent: Option<usize>,
    pub(crate) child: Option<usize>,
    mode: Option<OperationMode>,
    provided: Option<Capability>,
    state: NodeState,
}

impl ServiceNode {
    pub fn new(target: TargetDescriptor, secret: impl Into<Secret>, timeout: Duration) -> Result<Self> {
        let protocol = target.scheme.parse()?;
        Ok(Self {
            protocol,
            target,
            secret: secret.into(),
            timeout,
            parent: None,
            child: None,
            mode: None,
            provided: None,
            state: NodeState::Created,
        })
    }

    pub fn from_hop(hop: Hop, default_timeout: Duration) -> Result<Self> {
        let timeout = hop.timeout.unwrap_or(default_timeout);
        Self::new(hop.target, hop.secret, timeout)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn child(&self) -> Option<usize> {
        self.child
    }

    /// `None` until negotiated
    pub fn operation_mode(&self) -> Option<OperationMode> {
        self.mode
    }

    pub fn provided_capability(&self) -> Option<Capability> {
        self.provided
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn display_label(&self) -> String {
        self.target.display_label()
    }

    pub(crate) fn secret(&self) -> &Secret {
        &self.secret
    }

    pub(crate) fn set_state(&mut self, state: NodeState) {
        tracing::debug!("{} {:?} -> {:?}", self.display_label(), self.state, state);
        self.state = state;
    }

    /// Decide how this link would serve `wanted`, without touching it
    pub(crate) fn plan(&self, wanted: Option<Capability>) -> Result<LinkPlan> {
        if self.protocol.needs_parent() && self.parent.is_none() {
            return Err(ProvisionError::Capability(format!(
                "{} must be a child of a shell",
                self.protocol
            )));
        }

        if self.parent.is_none() && self.child.is_none() {
            return Ok(LinkPlan {
                mode: OperationMode::Direct,
                provided: self.protocol.default_capability(),
                from_parent: None,
            });
        }

        let provided = match wanted {
            Some(cap) if !self.protocol.provides().contains(&cap) => {
                return Err(ProvisionError::Capability(format!(
                    "{} cannot provide {}",
                    self.protocol, cap
                )));
            }
            Some(cap) => Some(cap),
            None => self.protocol.default_capability(),
        };

        Ok(match self.parent {
            None => LinkPlan {
                mode: OperationMode::Direct,
                provided,
                from_parent: None,
            },
            Some(_) => LinkPlan {
                mode: OperationMode::ThroughShell,
                provided,
                from_parent: Some(Capability::ShellAccess),
            },
        })
    }

    pub(crate) fn settle(&mut self, plan: LinkPlan) {
        tracing::debug!(
            "{} negotiated: mode {:?}, provides {:?}",
            self.display_label(),
            plan.mode,
            plan.provided
        );
        self.mode = Some(plan.mode);
        self.provided = plan.provided;
        self.set_state(NodeState::Negotiated);
    }
}

/// Announce and type a secret into the stream
pub(crate) fn send_secret(cnx: &mut dyn Connection, secret: &Secret) -> Result<()> {
    cnx.note(" [sending password...] ");
    cnx.send_line(secret.expose())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(location: &str) -> ServiceNode {
        ServiceNode::new(
            TargetDescriptor::parse(location).unwrap(),
            "pw",
            Duration::from_secs(45),
        )
        .unwrap()
    }

    #[test]
    fn test_protocol_declarations() {
        assert_eq!(
            Protocol::Ssh.provides(),
            &[Capability::ShellAccess, Capability::PortForward]
        );
        assert_eq!(Protocol::Mysql.default_capability(), Some(Capability::DatabaseConsole));
        assert_eq!(Protocol::Vnc.default_capability(), None);
        assert!(Protocol::Sudo.needs_parent());
        assert!(!Protocol::Su.needs_parent());
    }

    #[test]
    fn test_unknown_scheme_is_unsupported() {
        let err = ServiceNode::new(TargetDescriptor::new("rdp", "h"), "pw", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Unsupported(_)));
    }

    #[test]
    fn test_lone_node_is_direct() {
        let plan = node("ssh://u@h").plan(None).unwrap();
        assert_eq!(plan.mode, OperationMode::Direct);
        assert_eq!(plan.provided, Some(Capability::ShellAccess));
        assert_eq!(plan.from_parent, None);
    }

    #[test]
    fn test_plan_rejects_foreign_capability() {
        let mut mysql = node("mysql://m@db/shop");
        mysql.parent = Some(0);
        let err = mysql.plan(Some(Capability::ShellAccess)).unwrap_err();
        assert!(matches!(err, ProvisionError::Capability(_)));
        assert_eq!(mysql.state(), NodeState::Created);
        assert_eq!(mysql.operation_mode(), None);
    }

    #[test]
    fn test_plan_through_shell_asks_parent() {
        let mut sudo = node("sudo://");
        sudo.parent = Some(0);
        let plan = sudo.plan(None).unwrap();
        assert_eq!(plan.mode, OperationMode::ThroughShell);
        assert_eq!(plan.from_parent, Some(Capability::ShellAccess));
    }

    #[test]
    fn test_parentless_sudo_and_mysql_fail() {
        for location in ["sudo://", "mysql://m@db"] {
            let err = node(location).plan(None).unwrap_err();
            assert!(err.to_string().contains("must be a child of a shell"));
        }
    }

    #[test]
    fn test_capability_serde_names() {
        let json = serde_json::to_string(&Capability::DatabaseConsole).unwrap();
        assert_eq!(json, "\"database-console\"");
        let mode: OperationMode = serde_json::from_str("\"through-shell\"").unwrap();
        assert_eq!(mode, OperationMode::ThroughShell);
    }
}
