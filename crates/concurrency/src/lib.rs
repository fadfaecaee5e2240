//! Concurrency layer for Shardgate
//!
//! This crate holds the asynchronous plumbing and transaction state shared
//! by the router and the blocking bridge:
//! - Pending / Completer: one-shot handle pair for a submitted request
//! - RequestId / RequestIds: request identity used for cancellation
//! - Session / ShardSession: per-shard transaction ids exchanged with the backend
//! - TransactionScope: `Open` → `Committed` | `RolledBack` state machine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pending;
pub mod scope;

pub use pending::{channel, Completer, Pending, RequestId, RequestIds};
pub use scope::{ScopeState, Session, ShardSession, TransactionScope};
