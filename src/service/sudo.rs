//! `sudo` login automation
//!
//! `sudo` has no password of its own in the vault: when asked, it is fed the
//! password its parent link logged in with.

use std::time::Duration;

use super::prompts::{PASSWORD_PROMPT, SHELL_PROMPT, SORRY};
use super::{send_secret, LoginContext};
use crate::connection::{CommandLine, Connection, ExpectMatch};
use crate::error::{ProvisionError, Result};
use crate::expect::ExpectTable;
use crate::target::Secret;

pub(super) fn command() -> CommandLine {
    CommandLine::new("sudo").arg("-s")
}

pub(super) fn login(cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
    let secret = ctx.parent_secret.ok_or_else(|| {
        ProvisionError::Capability("sudo must be a child of a shell".to_string())
    })?;
    elevate(cnx, secret, ctx.timeout, "sudo")
}

/// Shared by `sudo` and `su`: succeed on a shell prompt, answer one password
/// prompt with `secret`, fail on a second one or on `Sorry`.
pub(super) fn elevate(
    cnx: &mut dyn Connection,
    secret: &Secret,
    timeout: Duration,
    scheme: &'static str,
) -> Result<()> {
    ExpectTable::new()
        .on(&SHELL_PROMPT, |_, _| {
            tracing::debug!("{} granted without a password", scheme);
            Ok(())
        })
        .on(&PASSWORD_PROMPT, move |cnx, _| {
            send_secret(cnx, secret)?;
            ExpectTable::new()
                .on(&SHELL_PROMPT, |_, _| Ok(()))
                .on(&PASSWORD_PROMPT, rejected(scheme))
                .on(&SORRY, rejected(scheme))
                .run(cnx, timeout)
        })
        .on(&SORRY, rejected(scheme))
        .run(cnx, timeout)
}

fn rejected(scheme: &'static str) -> impl FnOnce(&mut dyn Connection, &ExpectMatch) -> Result<()> {
    move |_, _| {
        Err(ProvisionError::Auth(format!(
            "failed to authenticate {}://",
            scheme
        )))
    }
}
