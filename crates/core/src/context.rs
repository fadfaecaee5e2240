//! Call context: deadline and cancellation
//!
//! Every public operation takes a [`Context`]. It carries an optional
//! deadline and a cancellation flag. Clones and contexts derived with
//! [`Context::with_timeout`] share the same flag, so cancelling any of them
//! cancels all of them; deadlines only ever tighten.
//!
//! ```ignore
//! let ctx = Context::background().with_timeout(Duration::from_secs(2));
//! let rows = conn.execute_shards(&ctx, query, "user", ["-80"])?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{CancelCause, Error, Result};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Deadline and cancellation signal threaded through every call
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    state: Arc<CancelState>,
}

impl Context {
    /// A context with no deadline that is never cancelled unless asked to
    pub fn background() -> Self {
        Self {
            deadline: None,
            state: Arc::new(CancelState::default()),
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context whose deadline is at most `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            state: Arc::clone(&self.state),
        }
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fire the cancellation signal
    ///
    /// Wakes every call currently suspended on this context. Idempotent.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            self.state.notify.notify_waiters();
        }
    }

    /// Check if [`Context::cancel`] was called
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Check if the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Why the context is done, or `None` while it is still live
    ///
    /// Explicit cancellation takes precedence over an expired deadline.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.is_cancelled() {
            Some(CancelCause::Cancelled)
        } else if self.is_expired() {
            Some(CancelCause::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Fail with a cancellation error if the context is done
    pub fn check(&self) -> Result<()> {
        match self.cause() {
            Some(cause) => Err(Error::cancelled(cause)),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes
    ///
    /// Never resolves for a background context that is not cancelled.
    pub async fn done(&self) -> CancelCause {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();

            if let Some(cause) = self.cause() {
                return cause;
            }

            match self.deadline {
                Some(deadline) => {
                    let deadline = tokio::time::Instant::from_std(deadline);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
