//! # Shardgate Executor
//!
//! Client-side access layer for a sharded relational store. Every query is
//! addressed to a keyspace and routed by one of four targeting modes:
//! explicit shards, keyspace ids, key ranges or entity ids.
//!
//! This crate provides:
//! - [`Router`] - asynchronous calls racing a caller [`Context`]
//! - [`Tx`] - a transaction spanning shard-local transactions
//! - [`StreamCursor`] - rows delivered incrementally
//! - [`BlockingConn`] - the same API for synchronous callers
//! - [`ExecutionPort`] - the backend capability everything is sent through
//! - [`MemoryPort`] - an in-process sharded backend
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardgate_executor::{BlockingConn, MemoryPort, Value};
//!
//! # fn main() -> shardgate_executor::Result<()> {
//! let port = MemoryPort::builder()
//!     .keyspace("user", ["-80", "80-"])
//!     .table("user", "users", ["id", "name"])
//!     .build()?;
//! let conn = BlockingConn::new(Arc::new(port))?;
//! let ctx = conn.context();
//!
//! conn.execute_keyspace_ids(
//!     &ctx,
//!     conn.query("insert into users (id, name) values (:id, 'ann')").bind("id", 1i64),
//!     "user",
//!     [[0x10u8]],
//! )?;
//! let rows = conn.execute_shards(&ctx, conn.query("select * from users"), "user", ["-80", "80-"])?;
//! assert_eq!(rows.rows[0][1], Value::from("ann"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is one [`Error`]; match on [`Error::kind`]. Nothing is
//! retried by this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod blocking;
mod command;
mod config;
mod memory;
mod output;
mod port;
mod router;
mod stats;
mod stream;
mod transaction;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API - Everything users need is re-exported here
// =============================================================================

pub use blocking::{BlockingConn, BlockingCursor, BlockingTx};
pub use command::{BatchQuery, BatchRequest, Command, ExecutionRequest, Mode, SplitQueryRequest};
pub use config::{ClientConfig, CONFIG_FILE_NAME};
pub use memory::{MemoryCounters, MemoryPort, MemoryPortBuilder};
pub use output::{Output, RowStream};
pub use port::ExecutionPort;
pub use router::Router;
pub use stats::StatsSnapshot;
pub use stream::StreamCursor;
pub use transaction::Tx;

// Re-export the data model so users don't need shardgate-core directly
pub use shardgate_core::{
    Bindings, BoundQuery, CancelCause, Context, Error, ErrorKind, Field, KeyRange, KeyspaceId,
    KeyspacePartition, QueryResult, Result, Row, RpcCode, ShardReference, SplitPart, SrvKeyspace,
    TabletRole, Target, TargetKind, Value,
};

// Re-export port plumbing for custom ExecutionPort implementations
pub use shardgate_concurrency::{
    channel, Completer, Pending, RequestId, RequestIds, ScopeState, Session, ShardSession,
};
