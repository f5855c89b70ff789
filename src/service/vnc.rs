//! `vnc` placeholder
//!
//! VNC links are declared by the vault but have no login sequence; they can
//! sit at the end of a chain and be negotiated, but prework refuses them.

use super::LoginContext;
use crate::connection::{CommandLine, Connection};
use crate::error::{ProvisionError, Result};
use crate::target::TargetDescriptor;

pub(super) fn command(target: &TargetDescriptor) -> Result<CommandLine> {
    Err(unsupported(target))
}

pub(super) fn login(_cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
    Err(unsupported(ctx.target))
}

fn unsupported(target: &TargetDescriptor) -> ProvisionError {
    ProvisionError::Unsupported(format!(
        "{} has no login automation",
        target.display_label()
    ))
}
