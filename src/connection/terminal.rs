//! Controlling terminal access
//!
//! Interact needs two things from the user's terminal: its current size and
//! a notification when that size changes. The notification is a scoped
//! subscription: [`ResizeWatch`] installs a `SIGWINCH` handler and puts the
//! previous disposition back when dropped, whichever way interact exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use super::WindowSize;
use crate::error::{ProvisionError, Result};

/// Source of window size and resize notifications
pub trait Terminal: Send + Sync {
    fn size(&self) -> io::Result<WindowSize>;

    /// Start listening for window size changes until the watch is dropped
    fn watch_resize(&self) -> Result<Box<dyn ResizeWatch>>;
}

pub trait ResizeWatch {
    /// Whether the window changed since the last call
    fn take_pending(&self) -> bool;
}

/// The terminal attached to this process' stdin/stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ControllingTerminal;

impl Terminal for ControllingTerminal {
    fn size(&self) -> io::Result<WindowSize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(WindowSize { rows, cols })
    }

    fn watch_resize(&self) -> Result<Box<dyn ResizeWatch>> {
        Ok(Box::new(SigwinchWatch::install()?))
    }
}

static RESIZED: AtomicBool = AtomicBool::new(false);
static WATCHING: AtomicBool = AtomicBool::new(false);

/// `SIGWINCH` subscription; only one may exist at a time
pub struct SigwinchWatch {
    #[cfg(unix)]
    previous: nix::sys::signal::SigAction,
}

#[cfg(unix)]
extern "C" fn on_window_change(_: std::os::raw::c_int) {
    RESIZED.store(true, Ordering::SeqCst);
}

impl SigwinchWatch {
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        if WATCHING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProvisionError::Chain(
                "a resize watch is already installed".to_string(),
            ));
        }

        RESIZED.store(false, Ordering::SeqCst);
        let action = SigAction::new(
            SigHandler::Handler(on_window_change),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // SAFETY: the handler only stores into an atomic
        match unsafe { sigaction(Signal::SIGWINCH, &action) } {
            Ok(previous) => {
                tracing::debug!("SIGWINCH watch installed");
                Ok(Self { previous })
            }
            Err(e) => {
                WATCHING.store(false, Ordering::SeqCst);
                Err(ProvisionError::Io(io::Error::from(e)))
            }
        }
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        if WATCHING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProvisionError::Chain(
                "a resize watch is already installed".to_string(),
            ));
        }
        Ok(Self {})
    }
}

impl ResizeWatch for SigwinchWatch {
    fn take_pending(&self) -> bool {
        RESIZED.swap(false, Ordering::SeqCst)
    }
}

impl Drop for SigwinchWatch {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{sigaction, Signal};

            // SAFETY: restores the disposition that was active before install
            if let Err(e) = unsafe { sigaction(Signal::SIGWINCH, &self.previous) } {
                tracing::warn!("Failed to restore SIGWINCH disposition: {}", e);
            }
        }
        RESIZED.store(false, Ordering::SeqCst);
        WATCHING.store(false, Ordering::SeqCst);
        tracing::debug!("SIGWINCH watch removed");
    }
}
