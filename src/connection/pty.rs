//! PTY-backed connection
//!
//! Wraps portable-pty: the root link of a chain spawns its login command
//! under a pseudo-terminal and every later link talks through it.
//!
//! A reader thread pumps PTY output into a channel so that pattern waits
//! can honour their deadline with `recv_timeout` and the relay loop can
//! poll output without blocking on the PTY itself.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use regex::Regex;

use super::buffer::ExpectBuffer;
use super::{CommandLine, Connection, ExpectMatch, RelayExit, Spawner, WindowSize};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

enum PtyEvent {
    Data(Vec<u8>),
    Eof,
}

/// Spawns root connections under a fresh pseudo-terminal
#[derive(Debug, Clone)]
pub struct PtySpawner {
    size: WindowSize,
    term: String,
}

impl PtySpawner {
    pub fn new(size: WindowSize, term: impl Into<String>) -> Self {
        Self {
            size,
            term: term.into(),
        }
    }

    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self::new(config.initial_size(), config.term.clone())
    }
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self::new(WindowSize::default(), "xterm-256color")
    }
}

impl Spawner for PtySpawner {
    fn spawn(&self, command: &CommandLine) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PtyConnection::spawn(command, self.size, &self.term)?))
    }
}

pub struct PtyConnection {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Receiver<PtyEvent>,
    buffer: ExpectBuffer,
    transcript: Box<dyn Write + Send>,
    exited: bool,
    closed: bool,
}

impl PtyConnection {
    /// Start `command` under a new PTY, echoing the transcript to stdout
    pub fn spawn(command: &CommandLine, size: WindowSize, term: &str) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ProvisionError::Connect(format!("failed to create PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.env("TERM", term);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        tracing::info!("Spawning `{}` under a PTY", command.program);
        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            tracing::error!("Failed to spawn `{}`: {}", command.program, e);
            ProvisionError::Connect(format!("failed to spawn `{}`: {}", command.program, e))
        })?;
        // Our copy of the slave side would keep the PTY open after the child exits
        drop(pair.slave);
        tracing::debug!("PTY child spawned, PID: {:?}", child.process_id());

        let (writer, rx) = match start_pump(pair.master.as_ref()) {
            Ok(io) => io,
            Err(e) => {
                tracing::error!("PTY setup failed, killing `{}`: {}", command.program, e);
                reap(child.as_mut());
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Self {
            master: pair.master,
            child,
            writer,
            output: rx,
            buffer: ExpectBuffer::new(),
            transcript: Box::new(io::stdout()),
            exited: false,
            closed: false,
        })
    }

    /// Send the handshake transcript somewhere other than stdout
    pub fn with_transcript(mut self, transcript: Box<dyn Write + Send>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn echo(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let result = self
            .transcript
            .write_all(text.as_bytes())
            .and_then(|_| self.transcript.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to write transcript: {}", e);
        }
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn terminate(&mut self) {
        reap(self.child.as_mut());
    }
}

/// Terminate the child's whole process group so nested programs do not linger
fn reap(child: &mut (dyn Child + Send + Sync)) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.process_id() {
            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                tracing::debug!("SIGTERM to process group {} failed: {}", pid, e);
            }
            std::thread::sleep(Duration::from_millis(50));
            // Fails harmlessly if the group already exited
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
    let _ = child.kill();
}

/// Take the PTY writer and start the thread pumping output into a channel
fn start_pump(master: &dyn MasterPty) -> Result<(Box<dyn Write + Send>, Receiver<PtyEvent>)> {
    let reader = master
        .try_clone_reader()
        .map_err(|e| ProvisionError::Connect(format!("failed to clone PTY reader: {}", e)))?;
    let writer = master
        .take_writer()
        .map_err(|e| ProvisionError::Connect(format!("failed to take PTY writer: {}", e)))?;

    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || read_pump(reader, tx))?;
    Ok((writer, rx))
}

fn read_pump(mut reader: Box<dyn Read + Send>, tx: Sender<PtyEvent>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue
            }
            // Linux reports EIO on the master once the child side is gone
            Err(e) => {
                tracing::debug!("PTY read pump stopped: {}", e);
                break;
            }
        }
    }
    let _ = tx.send(PtyEvent::Eof);
}

fn describe(patterns: &[Regex]) -> String {
    patterns
        .iter()
        .map(|p| format!("`{}`", p.as_str()))
        .collect::<Vec<_>>()
        .join(" | ")
}

impl Connection for PtyConnection {
    fn send_line(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(ProvisionError::Disconnected("connection already closed".to_string()));
        }
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn wait_for_any(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectMatch> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(m) = self.buffer.find(patterns) {
                self.echo(&m.before);
                self.echo(&m.matched);
                tracing::debug!("Matched pattern #{} `{}`", m.index, patterns[m.index].as_str());
                return Ok(m);
            }

            if self.exited {
                let pending = self.buffer.take();
                self.echo(&pending);
                return Err(ProvisionError::Disconnected(format!(
                    "process closed its output while waiting for {}",
                    describe(patterns)
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = if remaining.is_zero() {
                Err(RecvTimeoutError::Timeout)
            } else {
                self.output.recv_timeout(remaining)
            };

            match event {
                Ok(PtyEvent::Data(data)) => self.buffer.push(&data),
                Ok(PtyEvent::Eof) | Err(RecvTimeoutError::Disconnected) => self.exited = true,
                Err(RecvTimeoutError::Timeout) => {
                    let pending = self.buffer.take();
                    self.echo(&pending);
                    return Err(ProvisionError::ExpectTimeout {
                        timeout,
                        waiting_for: describe(patterns),
                    });
                }
            }
        }
    }

    fn note(&mut self, text: &str) {
        self.echo(text);
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ProvisionError::Io(io::Error::other(e.to_string())))
    }

    #[cfg(unix)]
    fn relay(
        &mut self,
        escape: u8,
        poll_resize: &mut dyn FnMut() -> Option<WindowSize>,
    ) -> Result<RelayExit> {
        use nix::errno::Errno;
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::AsFd;

        let _raw = RawModeGuard::enable()?;
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input = [0u8; 8192];

        // Whatever the last pattern wait left unread belongs to the user
        let pending = self.buffer.take();
        stdout.write_all(pending.as_bytes())?;
        stdout.flush()?;

        loop {
            if let Some(size) = poll_resize() {
                tracing::debug!("Window resized to {}x{}", size.cols, size.rows);
                self.resize(size)?;
            }

            loop {
                match self.output.try_recv() {
                    Ok(PtyEvent::Data(data)) => stdout.write_all(&data)?,
                    Ok(PtyEvent::Eof) | Err(TryRecvError::Disconnected) => {
                        self.exited = true;
                        stdout.flush()?;
                        return Ok(RelayExit::ProcessExited);
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
            stdout.flush()?;

            let readable = {
                let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::from(20u8)) {
                    Ok(n) if n > 0 => fds[0]
                        .revents()
                        .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP)),
                    Ok(_) | Err(Errno::EINTR) => false,
                    Err(e) => return Err(ProvisionError::Io(io::Error::from(e))),
                }
            };
            if !readable {
                continue;
            }

            let n = stdin.lock().read(&mut input)?;
            if n == 0 {
                return Ok(RelayExit::Detached);
            }
            let data = &input[..n];
            if let Some(pos) = data.iter().position(|&b| b == escape) {
                self.write_raw(&data[..pos])?;
                return Ok(RelayExit::Detached);
            }
            self.write_raw(data)?;
        }
    }

    #[cfg(not(unix))]
    fn relay(
        &mut self,
        _escape: u8,
        _poll_resize: &mut dyn FnMut() -> Option<WindowSize>,
    ) -> Result<RelayExit> {
        Err(ProvisionError::Unsupported(
            "interactive relay requires a unix terminal".to_string(),
        ))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        tracing::info!("Closing PTY connection (PID: {:?})", self.pid());
        self.terminate();
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for PtyConnection {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!("Dropping live PTY connection, killing process group");
            let _ = self.close();
        }
    }
}

/// Raw mode on the user's terminal for the duration of a relay
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}
