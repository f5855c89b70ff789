//! `su` login automation
//!
//! Same prompts as `sudo`, but `su` asks for the target user's password,
//! which is this link's own secret.

use super::sudo::elevate;
use super::LoginContext;
use crate::connection::{CommandLine, Connection};
use crate::error::Result;
use crate::target::TargetDescriptor;

pub(super) fn command(target: &TargetDescriptor) -> CommandLine {
    let cmd = CommandLine::new("su").arg("-");
    match &target.username {
        Some(user) => cmd.arg(user),
        None => cmd,
    }
}

pub(super) fn login(cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
    elevate(cnx, ctx.secret, ctx.timeout, "su")
}
