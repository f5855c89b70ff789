//! Pattern dispatch table
//!
//! Login automation is a series of "wait for one of these prompts, then
//! react" steps. An [`ExpectTable`] holds the prompts in priority order,
//! each with the handler to run when it matches, plus what to do on
//! timeout. Handlers may run another table on the same connection, which
//! is how multi-step handshakes are written.
//!
//! ```ignore
//! ExpectTable::new()
//!     .on(&PASSWORD_PROMPT, |cnx, _| send_secret(cnx, secret))
//!     .on(&LOGIN_BANNER, |_, _| Ok(()))
//!     .run(cnx, timeout)?;
//! ```

use std::time::Duration;

use regex::Regex;

use crate::connection::{Connection, ExpectMatch};
use crate::error::{ProvisionError, Result};

type Handler<'h, T> = Box<dyn FnOnce(&mut dyn Connection, &ExpectMatch) -> Result<T> + 'h>;
type TimeoutHandler<'h> = Box<dyn FnOnce(&mut dyn Connection) + 'h>;

pub struct ExpectTable<'h, T> {
    patterns: Vec<Regex>,
    handlers: Vec<Handler<'h, T>>,
    on_timeout: Option<TimeoutHandler<'h>>,
}

impl<'h, T> ExpectTable<'h, T> {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            handlers: Vec::new(),
            on_timeout: None,
        }
    }

    /// Append a pattern; earlier entries win when several match
    pub fn on<F>(mut self, pattern: &Regex, handler: F) -> Self
    where
        F: FnOnce(&mut dyn Connection, &ExpectMatch) -> Result<T> + 'h,
    {
        self.patterns.push(pattern.clone());
        self.handlers.push(Box::new(handler));
        self
    }

    /// Replace the default timeout reaction. The wait still fails with
    /// `ExpectTimeout` after the handler ran.
    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&mut dyn Connection) + 'h,
    {
        self.on_timeout = Some(Box::new(handler));
        self
    }

    /// Wait for the first matching pattern and run its handler
    pub fn run(mut self, cnx: &mut dyn Connection, timeout: Duration) -> Result<T> {
        if self.patterns.is_empty() {
            return Err(ProvisionError::Chain(
                "expect table has no patterns".to_string(),
            ));
        }

        match cnx.wait_for_any(&self.patterns, timeout) {
            Ok(m) => {
                let handler = self.handlers.swap_remove(m.index);
                handler(cnx, &m)
            }
            Err(err) if err.is_timeout() => {
                tracing::warn!("{}", err);
                match self.on_timeout.take() {
                    Some(handler) => handler(cnx),
                    None => cnx.note("\nTimed out"),
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

impl<T> Default for ExpectTable<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
