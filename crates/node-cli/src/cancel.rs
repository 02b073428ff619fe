//! Process-wide cancellation context and its binding to termination signals.
//!
//! A single [`Cancellation`] is created at process start and threaded through
//! every phase of composition and into the lifecycle runner. Clones share the
//! same state, so cancelling any clone wakes every waiter.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{info, warn};

const SIGNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

/// Signals that cancel the process context.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Cloneable cancellation context shared by every phase of the process.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<State>,
}

#[derive(Debug, Default)]
struct State {
    cancelled: Mutex<bool>,
    changed: Condvar,
}

impl Cancellation {
    /// Creates a context that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the context and wakes every waiter. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.changed.notify_all();
    }

    /// Returns `true` once [`Cancellation::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the context is cancelled.
    pub fn wait(&self) {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _cancelled = self
            .inner
            .changed
            .wait_while(guard, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks for at most `timeout`, returning `true` when the context was
    /// cancelled before the deadline.
    ///
    /// A timeout too large to express as a deadline waits without one.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*guard {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, _timeout) = self
                .inner
                .changed
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
        true
    }

    /// Cancels this context when the process receives a termination signal.
    ///
    /// The returned guard stops the listener thread when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the handlers cannot be installed or the
    /// listener thread cannot be spawned.
    pub fn bind_to_signals(&self) -> Result<SignalBinding, SignalError> {
        let mut signals =
            Signals::new(TERMINATION_SIGNALS).map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        let cancellation = self.clone();
        let thread = thread::Builder::new()
            .name(String::from("signal-listener"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: SIGNAL_TARGET,
                        signal,
                        "termination signal received; cancelling node context"
                    );
                    cancellation.cancel();
                }
            })
            .map_err(|source| SignalError::Spawn { source })?;
        Ok(SignalBinding {
            handle,
            thread: Some(thread),
        })
    }
}

/// Errors raised while binding the cancellation context to OS signals.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing the signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the listener thread failed.
    #[error("failed to spawn signal listener thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Keeps the signal listener alive; dropping it unregisters the handlers.
#[derive(Debug)]
pub struct SignalBinding {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SignalBinding {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: SIGNAL_TARGET, "signal listener thread panicked");
        }
    }
}
