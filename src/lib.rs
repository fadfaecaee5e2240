//! Shardgate - client-side access layer for sharded relational stores
//!
//! Applications address a logical keyspace that is physically split into
//! shards by key range. Every call names its shards explicitly, by keyspace
//! id, by key range, or by entity id; Shardgate routes it, reassembles the
//! answers and classifies the failures.
//!
//! # Quick Start
//!
//! ```ignore
//! use shardgate::{Context, MemoryPort, Router, BoundQuery};
//!
//! let port = Arc::new(MemoryPort::builder().keyspace("user", ["-80", "80-"]).build()?);
//! let router = Router::new(port);
//! let ctx = Context::background().with_timeout(Duration::from_secs(1));
//!
//! let rows = router
//!     .execute_shards(&ctx, BoundQuery::new("select * from users"), "user", ["-80", "80-"])
//!     .await?;
//! ```
//!
//! # Architecture
//!
//! Every operation is implemented once on the asynchronous [`Router`] and
//! funnels through an [`ExecutionPort`]. [`BlockingConn`] drives the same
//! operations for synchronous callers.

// Re-export the public API from shardgate-executor
pub use shardgate_executor::*;
