//! In-memory connection for driving protocol handlers in tests
//!
//! A [`Script`] lists what the fake program prints when spawned and how it
//! replies to each line it receives, in order. Everything the engine does
//! to the connection lands in a shared [`ScriptLog`].

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;

use super::buffer::ExpectBuffer;
use super::terminal::{ResizeWatch, Terminal};
use super::{CommandLine, Connection, ExpectMatch, RelayExit, Spawner, WindowSize};
use crate::error::{ProvisionError, Result};

#[derive(Debug, Default)]
pub(crate) struct ScriptLog {
    pub spawned: Vec<String>,
    pub sent: Vec<String>,
    pub notes: Vec<String>,
    pub resizes: Vec<WindowSize>,
    pub closes: usize,
    pub transcript: String,
}

pub(crate) type SharedLog = Arc<Mutex<ScriptLog>>;

#[derive(Debug, Clone)]
pub(crate) struct Script {
    on_spawn: String,
    replies: VecDeque<(String, String)>,
    relay_exit: RelayExit,
}

impl Script {
    pub fn new() -> Self {
        Self {
            on_spawn: String::new(),
            replies: VecDeque::new(),
            relay_exit: RelayExit::Detached,
        }
    }

    /// Output available as soon as the program starts
    pub fn on_spawn(mut self, output: &str) -> Self {
        self.on_spawn.push_str(output);
        self
    }

    /// When the next line received equals `line`, print `output`
    pub fn reply(mut self, line: &str, output: &str) -> Self {
        self.replies.push_back((line.to_string(), output.to_string()));
        self
    }

    pub fn relay_exit(mut self, exit: RelayExit) -> Self {
        self.relay_exit = exit;
        self
    }

    pub fn into_connection(self, log: SharedLog) -> ScriptedConnection {
        let mut buffer = ExpectBuffer::new();
        buffer.push_str(&self.on_spawn);
        ScriptedConnection {
            buffer,
            replies: self.replies,
            relay_exit: self.relay_exit,
            log,
        }
    }
}

pub(crate) struct ScriptedConnection {
    buffer: ExpectBuffer,
    replies: VecDeque<(String, String)>,
    relay_exit: RelayExit,
    log: SharedLog,
}

impl Connection for ScriptedConnection {
    fn send_line(&mut self, text: &str) -> Result<()> {
        self.log.lock().unwrap().sent.push(text.to_string());
        if self.replies.front().is_some_and(|(line, _)| line == text) {
            if let Some((_, output)) = self.replies.pop_front() {
                self.buffer.push_str(&output);
            }
        }
        Ok(())
    }

    fn wait_for_any(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectMatch> {
        match self.buffer.find(patterns) {
            Some(m) => {
                let mut log = self.log.lock().unwrap();
                log.transcript.push_str(&m.before);
                log.transcript.push_str(&m.matched);
                Ok(m)
            }
            // Nothing more will ever arrive, so a miss is a timeout
            None => {
                let pending = self.buffer.take();
                self.log.lock().unwrap().transcript.push_str(&pending);
                Err(ProvisionError::ExpectTimeout {
                    timeout,
                    waiting_for: patterns
                        .iter()
                        .map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(" | "),
                })
            }
        }
    }

    fn note(&mut self, text: &str) {
        let mut log = self.log.lock().unwrap();
        log.notes.push(text.to_string());
        log.transcript.push_str(text);
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        self.log.lock().unwrap().resizes.push(size);
        Ok(())
    }

    fn relay(
        &mut self,
        _escape: u8,
        poll_resize: &mut dyn FnMut() -> Option<WindowSize>,
    ) -> Result<RelayExit> {
        if let Some(size) = poll_resize() {
            self.resize(size)?;
        }
        Ok(self.relay_exit)
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Hands out a single scripted connection and records spawn attempts
pub(crate) struct ScriptSpawner {
    script: Mutex<Option<Script>>,
    pub log: SharedLog,
}

impl ScriptSpawner {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            log: SharedLog::default(),
        }
    }

    /// A spawner whose program never starts
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(None),
            log: SharedLog::default(),
        }
    }
}

impl Spawner for ScriptSpawner {
    fn spawn(&self, command: &CommandLine) -> Result<Box<dyn Connection>> {
        self.log.lock().unwrap().spawned.push(command.to_line());
        match self.script.lock().unwrap().take() {
            Some(script) => Ok(Box::new(script.into_connection(self.log.clone()))),
            None => Err(ProvisionError::Connect(format!(
                "failed to spawn `{}`",
                command.program
            ))),
        }
    }
}

/// Terminal with a fixed size that reports one pending resize
pub(crate) struct FixedTerminal {
    pub size: WindowSize,
    pub live_watches: Arc<AtomicUsize>,
}

impl FixedTerminal {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            size: WindowSize { rows, cols },
            live_watches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Terminal for FixedTerminal {
    fn size(&self) -> io::Result<WindowSize> {
        Ok(self.size)
    }

    fn watch_resize(&self) -> Result<Box<dyn ResizeWatch>> {
        self.live_watches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixedWatch {
            pending: AtomicBool::new(true),
            live: self.live_watches.clone(),
        }))
    }
}

struct FixedWatch {
    pending: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl ResizeWatch for FixedWatch {
    fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl Drop for FixedWatch {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
