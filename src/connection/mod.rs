//! Connection handle abstraction
//!
//! A [`Connection`] is one interactive process the chain talks to: the
//! root link spawns it through a [`Spawner`], every inner link writes its
//! own login command into the same stream. Production code uses
//! [`PtyConnection`]; tests use the scripted connection in `testing`.

pub mod buffer;
pub mod pty;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use buffer::ExpectBuffer;
pub use pty::{PtyConnection, PtySpawner};
pub use terminal::{ControllingTerminal, ResizeWatch, Terminal};

/// Result of a successful [`Connection::wait_for_any`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Position of the matching pattern in the list that was waited on
    pub index: usize,
    /// Text matched by the pattern
    pub matched: String,
    /// Output that preceded the match
    pub before: String,
}

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Why [`Connection::relay`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayExit {
    /// The user typed the escape byte
    Detached,
    /// The remote side closed the stream
    ProcessExited,
}

/// A program invocation, spawned directly or typed into a parent shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The line sent into a shell for `through-shell` links
    pub fn to_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// One live interactive session
///
/// Only one node writes into a connection at a time; the chain lends it out
/// by `&mut` borrow, which is what keeps the login transcript consistent.
pub trait Connection: Send {
    /// Write `text` followed by a line terminator
    fn send_line(&mut self, text: &str) -> Result<()>;

    /// Block until one of `patterns` matches the output or `timeout` elapses.
    ///
    /// The first pattern in list order that matches wins. Everything consumed
    /// is echoed to the transcript, including the unmatched output on timeout.
    fn wait_for_any(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectMatch>;

    /// Write an annotation into the transcript
    fn note(&mut self, text: &str);

    fn resize(&mut self, size: WindowSize) -> Result<()>;

    /// Hand the stream to the user until `escape` is typed or the process
    /// exits. `poll_resize` is called between reads; a returned size is
    /// applied to the session.
    fn relay(
        &mut self,
        escape: u8,
        poll_resize: &mut dyn FnMut() -> Option<WindowSize>,
    ) -> Result<RelayExit>;

    /// Terminate the process and release it; calling twice is harmless
    fn close(&mut self) -> Result<()>;
}

/// Creates the root connection of a chain
pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &CommandLine) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let cmd = CommandLine::new("ssh").arg("-l").arg("root").arg("bastion");
        assert_eq!(cmd.to_line(), "ssh -l root bastion");
        assert_eq!(CommandLine::new("sudo").arg("-s").to_string(), "sudo -s");
    }

    #[test]
    fn test_window_size_default() {
        let size = WindowSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }
}
