//! The execution port: the single asynchronous capability every call
//! funnels through.
//!
//! A port owns the transport, the connection and whatever task runs the
//! request. The router only submits commands and, when it stops waiting,
//! asks the port to abandon them.
//!
//! [`dispatch`] is the one place a submitted request is awaited. It races
//! the pending outcome against the caller's [`Context`] and guarantees the
//! request is never orphaned: either its outcome is observed or the port's
//! `cancel` is called for it.

use shardgate_concurrency::{Pending, RequestId};
use shardgate_core::{Context, Error, Result};
use tracing::debug;

use crate::{Command, Output};

/// Asynchronous backend capability consumed by the router
///
/// # Thread Safety
///
/// Ports are shared by every clone of a router and by spawned fan-out
/// tasks, so they must be `Send + Sync`.
pub trait ExecutionPort: Send + Sync {
    /// Start `command` and return a handle to its outcome
    ///
    /// Must not block. Failures are delivered through the handle.
    fn submit(&self, ctx: &Context, command: Command) -> Pending<Output>;

    /// Abandon an in-flight request, best effort
    ///
    /// Called at most once per request the router stopped waiting for, and
    /// for streams released before they ended. Unknown or finished ids are
    /// ignored.
    fn cancel(&self, id: RequestId);
}

/// Cancels a request on drop unless its outcome was observed
struct InFlight<'a> {
    port: &'a dyn ExecutionPort,
    id: RequestId,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(port: &'a dyn ExecutionPort, id: RequestId) -> Self {
        Self {
            port,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(target: "shardgate::router", request = %self.id, "Cancelling abandoned request");
            self.port.cancel(self.id);
        }
    }
}

/// Submit `command` and wait for its outcome or for `ctx` to finish
///
/// A context that is already done fails before anything is submitted. If
/// the context fires first, or the returned future is dropped, the port's
/// `cancel` is invoked for the request.
pub(crate) async fn dispatch(
    port: &dyn ExecutionPort,
    ctx: &Context,
    command: Command,
) -> Result<Output> {
    ctx.check()?;

    let name = command.name();
    let mut pending = port.submit(ctx, command);
    let id = pending.id();
    let mut guard = InFlight::new(port, id);

    tokio::select! {
        biased;
        outcome = &mut pending => {
            guard.disarm();
            outcome
        }
        cause = ctx.done() => {
            debug!(
                target: "shardgate::router",
                command = name,
                request = %id,
                cause = %cause,
                "Call abandoned before the port answered"
            );
            Err(Error::cancelled(cause))
        }
    }
}
