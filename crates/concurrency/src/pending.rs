//! Pending results of submitted requests
//!
//! An execution port answers every submitted request with a [`Pending`]
//! handle and keeps the matching [`Completer`]. The handle is a future that
//! resolves to the request's outcome exactly once.
//!
//! ```text
//! let (completer, pending) = pending::channel(ids.next());
//! spawn(async move { completer.complete(run(request).await) });
//! pending   // returned to the router
//! ```
//!
//! A completer dropped without completing resolves the handle with a
//! transport error, so a waiting caller never hangs on a lost request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context as TaskContext, Poll};

use shardgate_core::{Error, Result, RpcCode};
use tokio::sync::oneshot;

/// Identity of one submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request #{}", self.0)
    }
}

/// Monotonic allocator of request ids, owned by a port
#[derive(Debug, Default)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    /// Create an allocator starting at 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    pub fn next(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Create a linked completer/handle pair for request `id`
pub fn channel<T>(id: RequestId) -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { id, tx }, Pending { id, rx })
}

/// Port-side half: delivers the outcome of one request
#[derive(Debug)]
pub struct Completer<T> {
    id: RequestId,
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Completer<T> {
    /// Request this completer answers
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Deliver the outcome
    ///
    /// Returns `false` if the handle was already dropped (the caller stopped
    /// waiting); the outcome is discarded in that case.
    pub fn complete(self, result: Result<T>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Check if the waiting side has gone away
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Caller-side half: resolves to the outcome of one request
#[derive(Debug)]
pub struct Pending<T> {
    id: RequestId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// A handle that is already resolved
    pub fn ready(id: RequestId, result: Result<T>) -> Self {
        let (completer, pending) = channel(id);
        completer.complete(result);
        pending
    }

    /// Request this handle waits on
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Take the outcome without waiting, if it has arrived
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(lost(self.id))),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let id = self.id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(lost(id))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn lost(id: RequestId) -> Error {
    Error::transport(
        RpcCode::InternalError,
        format!("{} was dropped by the execution port without an outcome", id),
    )
}
