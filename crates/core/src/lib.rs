//! Core types for Shardgate
//!
//! This crate defines the leaf data model every request is built from:
//! - Value: bind variable and row cell values
//! - BoundQuery: query envelope (text, bind variables, tablet role)
//! - Target: targeting descriptor (shards, keyspace ids, key ranges, entity ids)
//! - KeyRange / KeyspaceId: keyspace addressing
//! - QueryResult / Field / Row: materialized results
//! - SplitPart: one slice of a split full-table scan
//! - SrvKeyspace: serving topology of a keyspace
//! - Context: deadline and cancellation signal
//! - Error: classified error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod result;
pub mod split;
pub mod target;
pub mod topology;
pub mod types;
pub mod value;

pub use context::Context;
pub use error::{CancelCause, Error, ErrorKind, Result, RpcCode};
pub use result::{Field, QueryResult, Row};
pub use split::SplitPart;
pub use target::{Target, TargetKind};
pub use topology::{KeyspacePartition, ShardReference, SrvKeyspace};
pub use types::{Bindings, BoundQuery, KeyRange, KeyspaceId, TabletRole};
pub use value::Value;
