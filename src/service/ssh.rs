//! `ssh` login automation

use std::time::Duration;

use super::prompts::{HOST_KEY_PROMPT, LOGIN_BANNER, PASSWORD_PROMPT, SHELL_PROMPT};
use super::{send_secret, LoginContext, OperationMode};
use crate::connection::{CommandLine, Connection};
use crate::error::Result;
use crate::expect::ExpectTable;
use crate::target::{Secret, TargetDescriptor};

const DEFAULT_USER: &str = "root";

pub(super) fn command(target: &TargetDescriptor) -> CommandLine {
    let user = target.username.as_deref().unwrap_or(DEFAULT_USER);
    let mut cmd = CommandLine::new("ssh").arg("-l").arg(user).arg(&target.host);
    if let Some(port) = target.port {
        cmd = cmd.arg("-p").arg(port.to_string());
    }
    cmd
}

pub(super) fn login(cnx: &mut dyn Connection, ctx: &LoginContext<'_>) -> Result<()> {
    if ctx.mode == OperationMode::Direct {
        let user = ctx.target.username.as_deref().unwrap_or(DEFAULT_USER);
        cnx.note(&format!("Trying to login to {} as {} ...\n", ctx.target.host, user));
    }

    let secret = ctx.secret;
    let timeout = ctx.timeout;

    ExpectTable::new()
        .on(&PASSWORD_PROMPT, move |cnx, _| password(cnx, secret, timeout))
        .on(&LOGIN_BANNER, move |cnx, _| logged_in_with_key(cnx, timeout))
        .on(&HOST_KEY_PROMPT, move |cnx, _| {
            tracing::info!("Accepting unknown host key");
            cnx.send_line("yes")?;
            ExpectTable::new()
                .on(&PASSWORD_PROMPT, move |cnx, _| password(cnx, secret, timeout))
                .on(&LOGIN_BANNER, move |cnx, _| logged_in_with_key(cnx, timeout))
                .run(cnx, timeout)
        })
        .run(cnx, timeout)
}

fn password(cnx: &mut dyn Connection, secret: &Secret, timeout: Duration) -> Result<()> {
    send_secret(cnx, secret)?;
    ExpectTable::new()
        .on(&SHELL_PROMPT, |_, _| Ok(()))
        .run(cnx, timeout)
}

/// The banner precedes the shell prompt; both are consumed so the next link
/// starts from fresh output
fn logged_in_with_key(cnx: &mut dyn Connection, timeout: Duration) -> Result<()> {
    cnx.note("\nWe're in! (using shared-key?)\n");
    ExpectTable::new()
        .on(&SHELL_PROMPT, |_, _| Ok(()))
        .run(cnx, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{Script, SharedLog};
    use crate::error::ProvisionError;

    fn ctx<'a>(target: &'a TargetDescriptor, secret: &'a Secret) -> LoginContext<'a> {
        LoginContext {
            target,
            secret,
            parent_secret: None,
            timeout: Duration::from_secs(1),
            mode: OperationMode::Direct,
        }
    }

    #[test]
    fn test_command_line() {
        let target = TargetDescriptor::new("ssh", "bastion").with_user("deploy").with_port(2222);
        assert_eq!(command(&target).to_line(), "ssh -l deploy bastion -p 2222");

        let target = TargetDescriptor::new("ssh", "bastion");
        assert_eq!(command(&target).to_line(), "ssh -l root bastion");
    }

    #[test]
    fn test_password_login() {
        let log = SharedLog::default();
        let mut cnx = Script::new()
            .on_spawn("u@h's password: ")
            .reply("p", "Welcome\r\nu@h:~$ ")
            .into_connection(log.clone());
        let target = TargetDescriptor::new("ssh", "h").with_user("u");
        let secret = Secret::new("p");

        login(&mut cnx, &ctx(&target, &secret)).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["p"]);
        assert!(log.transcript.contains("Trying to login to h as u ..."));
        assert!(log.transcript.contains(" [sending password...] "));
    }

    #[test]
    fn test_unknown_host_key_is_accepted() {
        let log = SharedLog::default();
        let mut cnx = Script::new()
            .on_spawn("The authenticity of host 'h' can't be established.\r\nAre you sure you want to continue connecting (yes/no)? ")
            .reply("yes", "Warning: Permanently added 'h'.\r\nPassword: ")
            .reply("p", "u@h:~$ ")
            .into_connection(log.clone());
        let target = TargetDescriptor::new("ssh", "h").with_user("u");
        let secret = Secret::new("p");

        login(&mut cnx, &ctx(&target, &secret)).unwrap();
        assert_eq!(log.lock().unwrap().sent, vec!["yes", "p"]);
    }

    #[test]
    fn test_key_login_sends_no_secret() {
        let log = SharedLog::default();
        let mut cnx = Script::new()
            .on_spawn("Last login: Tue Oct 14 09:12:01 2025\r\nu@h:~$ ")
            .into_connection(log.clone());
        let target = TargetDescriptor::new("ssh", "h").with_user("u");
        let secret = Secret::new("p");

        login(&mut cnx, &ctx(&target, &secret)).unwrap();

        let log = log.lock().unwrap();
        assert!(log.sent.is_empty());
        assert!(log.transcript.contains("We're in!"));
        assert!(log.transcript.ends_with("u@h:~$"));
    }

    #[test]
    fn test_key_login_waits_for_shell_prompt() {
        let log = SharedLog::default();
        let mut cnx = Script::new()
            .on_spawn("Last login: Tue Oct 14 09:12:01 2025 from 10.0.0.1\r\n")
            .into_connection(log);
        let target = TargetDescriptor::new("ssh", "h").with_user("u");
        let secret = Secret::new("p");

        let err = login(&mut cnx, &ctx(&target, &secret)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_wrong_password_times_out() {
        let log = SharedLog::default();
        let mut cnx = Script::new()
            .on_spawn("Password: ")
            .reply("p", "Permission denied, please try again.\r\n")
            .into_connection(log);
        let target = TargetDescriptor::new("ssh", "h");
        let secret = Secret::new("p");

        let err = login(&mut cnx, &ctx(&target, &secret)).unwrap_err();
        assert!(matches!(err, ProvisionError::ExpectTimeout { .. }));
    }
}
