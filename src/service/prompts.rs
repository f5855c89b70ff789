//! Prompts the login handlers react to

use std::sync::LazyLock;

use regex::Regex;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("built-in prompt pattern must compile")
}

/// `Password:`, `u@h's password:`, `[sudo] password for x:`
pub static PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)password( for [^:\r\n]+)?:"));

/// A generic `user@host:path$` or `#` shell prompt, never spanning lines
pub static SHELL_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"[^\s]*@[^\r\n]*:[^\r\n]*[$#]"));

/// Printed by sshd after a key-based login
pub static LOGIN_BANNER: LazyLock<Regex> = LazyLock::new(|| pattern("Last login"));

pub static HOST_KEY_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| pattern("(?i)are you sure you want to continue connecting"));

/// sudo's rejection banner
pub static SORRY: LazyLock<Regex> = LazyLock::new(|| pattern("Sorry"));

pub static MYSQL_PROMPT: LazyLock<Regex> = LazyLock::new(|| pattern("mysql>"));

/// `ERROR 1045 (28000): Access denied ...`
pub static MYSQL_ERROR: LazyLock<Regex> = LazyLock::new(|| pattern(r"ERROR \d+"));
