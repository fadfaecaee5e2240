//! Command enum defining every request sent to an execution port.
//!
//! Commands are the "instruction set" between the router and the backend.
//! Every call the router makes is one variant of this enum.
//!
//! Commands are:
//! - **Self-contained**: query, target and session travel together
//! - **Serializable**: a port may put them on the wire as they are
//! - **Pure data**: no closures or channels

use serde::{Deserialize, Serialize};
use shardgate_concurrency::Session;
use shardgate_core::{BoundQuery, Target};

/// How an execution delivers its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One fully materialized result
    Single,
    /// Rows delivered in chunks as shards produce them
    Stream,
}

/// One query against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Query envelope
    pub query: BoundQuery,
    /// Targeting descriptor
    pub target: Target,
    /// Delivery mode
    pub mode: Mode,
    /// Session of the enclosing transaction, `None` to autocommit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl ExecutionRequest {
    /// A single-result request outside any transaction
    pub fn single(query: BoundQuery, target: Target) -> Self {
        Self {
            query,
            target,
            mode: Mode::Single,
            session: None,
        }
    }

    /// A streaming request; streams never run inside a transaction
    pub fn stream(query: BoundQuery, target: Target) -> Self {
        Self {
            query,
            target,
            mode: Mode::Stream,
            session: None,
        }
    }

    /// Attach a transaction session
    pub fn in_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }
}

/// One element of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuery {
    /// Query envelope
    pub query: BoundQuery,
    /// Targeting descriptor
    pub target: Target,
}

impl BatchQuery {
    /// Pair a query with its target
    pub fn new(query: BoundQuery, target: Target) -> Self {
        Self { query, target }
    }
}

/// Ordered batch executed as one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Elements, results come back in the same order
    pub queries: Vec<BatchQuery>,
    /// Wrap the batch in one transaction per touched shard
    pub as_transaction: bool,
    /// Session of the enclosing transaction, `None` to autocommit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

/// Request to split a full-table scan into key-range parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitQueryRequest {
    /// Keyspace of the table
    pub keyspace: String,
    /// Query to split
    pub query: BoundQuery,
    /// Column whose key range is partitioned
    pub split_column: String,
    /// Approximate number of parts wanted
    pub split_count: u32,
}

/// A request to an execution port.
///
/// # Command Categories
///
/// | Category | Variants | Returns |
/// |----------|----------|---------|
/// | Execution | Execute, ExecuteBatch | `Output::Executed`, `Output::Batch` |
/// | Streaming | StreamExecute | `Output::Stream` |
/// | Transaction | Begin, Commit, Rollback | `Output::Session`, `Output::Unit` |
/// | Metadata | SplitQuery, GetSrvKeyspace | `Output::SplitParts`, `Output::SrvKeyspace` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Run one query and materialize its result.
    /// Returns: `Output::Executed`
    Execute(ExecutionRequest),

    /// Run a batch of queries.
    /// Returns: `Output::Batch`
    ExecuteBatch(BatchRequest),

    /// Run one query and stream its rows.
    /// Returns: `Output::Stream`
    StreamExecute(ExecutionRequest),

    /// Open a transaction.
    /// Returns: `Output::Session`
    Begin,

    /// Commit every shard-local transaction of a session.
    /// Returns: `Output::Unit`
    Commit(Session),

    /// Discard every shard-local transaction of a session.
    /// Returns: `Output::Unit`
    Rollback(Session),

    /// Split a query into key-range parts.
    /// Returns: `Output::SplitParts`
    SplitQuery(SplitQueryRequest),

    /// Look up the serving topology of a keyspace.
    /// Returns: `Output::SrvKeyspace`
    GetSrvKeyspace {
        /// Keyspace name
        keyspace: String,
    },
}

impl Command {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Command::Execute(_) => "Execute",
            Command::ExecuteBatch(_) => "ExecuteBatch",
            Command::StreamExecute(_) => "StreamExecute",
            Command::Begin => "Begin",
            Command::Commit(_) => "Commit",
            Command::Rollback(_) => "Rollback",
            Command::SplitQuery(_) => "SplitQuery",
            Command::GetSrvKeyspace { .. } => "GetSrvKeyspace",
        }
    }
}
