//! Output enum for command execution results.
//!
//! Every command produces exactly one output variant. A port that answers
//! with a different variant is broken; the router reports that as a
//! transport error with code `InternalError`.

use std::fmt;

use shardgate_concurrency::{RequestId, Session};
use shardgate_core::{Error, QueryResult, Result, RpcCode, SplitPart, SrvKeyspace};
use tokio::sync::mpsc;

/// Live stream of result chunks produced by a port
///
/// The first chunk carries the column metadata; later chunks carry rows
/// only. The stream ends when the sender is dropped. An `Err` chunk ends
/// the stream with a failure.
pub struct RowStream {
    id: RequestId,
    chunks: mpsc::Receiver<Result<QueryResult>>,
}

impl RowStream {
    /// Wrap the receiving end of a chunk channel
    ///
    /// `id` is the request the port cancels to release the stream early.
    pub fn new(id: RequestId, chunks: mpsc::Receiver<Result<QueryResult>>) -> Self {
        Self { id, chunks }
    }

    /// Request identity used to release the stream
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next chunk, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<Result<QueryResult>> {
        self.chunks.recv().await
    }

    /// Stop accepting chunks
    pub fn close(&mut self) {
        self.chunks.close();
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").field("id", &self.id).finish()
    }
}

/// Successful command execution results.
///
/// Each [`Command`](crate::Command) variant maps to exactly one `Output`
/// variant, documented on the command.
#[derive(Debug)]
pub enum Output {
    /// Result of `Execute`
    Executed {
        /// Rows of every targeted shard, in target order
        result: QueryResult,
        /// Updated session when the request carried one
        session: Option<Session>,
    },

    /// Result of `ExecuteBatch`, one entry per batch element
    Batch {
        /// Results in input order
        results: Vec<QueryResult>,
        /// Updated session when the request carried one
        session: Option<Session>,
    },

    /// Result of `StreamExecute`
    Stream(RowStream),

    /// Result of `Begin`
    Session(Session),

    /// Result of `Commit` and `Rollback`
    Unit,

    /// Result of `SplitQuery`
    SplitParts(Vec<SplitPart>),

    /// Result of `GetSrvKeyspace`
    SrvKeyspace(SrvKeyspace),
}

impl Output {
    /// Short name used in errors
    pub fn name(&self) -> &'static str {
        match self {
            Output::Executed { .. } => "Executed",
            Output::Batch { .. } => "Batch",
            Output::Stream(_) => "Stream",
            Output::Session(_) => "Session",
            Output::Unit => "Unit",
            Output::SplitParts(_) => "SplitParts",
            Output::SrvKeyspace(_) => "SrvKeyspace",
        }
    }

    pub(crate) fn into_executed(self) -> Result<(QueryResult, Option<Session>)> {
        match self {
            Output::Executed { result, session } => Ok((result, session)),
            other => Err(unexpected("Executed", &other)),
        }
    }

    pub(crate) fn into_batch(self) -> Result<(Vec<QueryResult>, Option<Session>)> {
        match self {
            Output::Batch { results, session } => Ok((results, session)),
            other => Err(unexpected("Batch", &other)),
        }
    }

    pub(crate) fn into_stream(self) -> Result<RowStream> {
        match self {
            Output::Stream(stream) => Ok(stream),
            other => Err(unexpected("Stream", &other)),
        }
    }

    pub(crate) fn into_session(self) -> Result<Session> {
        match self {
            Output::Session(session) => Ok(session),
            other => Err(unexpected("Session", &other)),
        }
    }

    pub(crate) fn into_unit(self) -> Result<()> {
        match self {
            Output::Unit => Ok(()),
            other => Err(unexpected("Unit", &other)),
        }
    }

    pub(crate) fn into_split_parts(self) -> Result<Vec<SplitPart>> {
        match self {
            Output::SplitParts(parts) => Ok(parts),
            other => Err(unexpected("SplitParts", &other)),
        }
    }

    pub(crate) fn into_srv_keyspace(self) -> Result<SrvKeyspace> {
        match self {
            Output::SrvKeyspace(keyspace) => Ok(keyspace),
            other => Err(unexpected("SrvKeyspace", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Output) -> Error {
    Error::transport(
        RpcCode::InternalError,
        format!("execution port answered {} where {} was expected", got.name(), expected),
    )
}
