//! `mysql` console login automation

use super::prompts::{MYSQL_ERROR, MYSQL_PROMPT, PASSWORD_PROMPT};
use super::{send_secret, LoginContext};
use crate::connection::{CommandLine, Connection};
use crate::error::{ProvisionError, Result};
use crate::expect::ExpectTable;
use crate::target::TargetDescriptor;

const DEFAULT_USER: &str = "root";

/// `mysql -u <user> -p [<database>]`, the database being the URL path
pub(super) fn command(target: &TargetDescriptor) -> CommandLine {
    let user = target.username.as_deref().unwrap_or(DEFAULT_USER);
    let cmd = CommandLine::new("mysql").arg("-u").arg(user).arg("-p");

    let database = target
        .path
        .as_deref()
        .map(|path| path.trim_start_matches('/'))
        .unwrap_or_default();
    if database.is_empty() {
        cmd
    } else {
        cmd.arg(database)
    }
}

pub(super) fn login(cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
    let secret = ctx.secret;
    let timeout = ctx.timeout;

    ExpectTable::new()
        .on(&PASSWORD_PROMPT, move |cnx, _| {
            send_secret(cnx, secret)?;
            ExpectTable::new()
                .on(&MYSQL_PROMPT, |_, _| Ok(()))
                .on(&MYSQL_ERROR, |_, m| {
                    Err(ProvisionError::Auth(format!(
                        "failed to authenticate with mysql ({})",
                        m.matched
                    )))
                })
                .run(cnx, timeout)
        })
        .on(&MYSQL_ERROR, |_, m| {
            Err(ProvisionError::Auth(format!(
                "mysql failed at program launch ({})",
                m.matched
            )))
        })
        .run(cnx, timeout)
}
