//! Integration Tests
//!
//! End-to-end behavior of the public surface:
//! - Batch ordering and fail-fast under out-of-order completion
//! - Cancellation reaching the port within bounded time
//! - Transaction atomicity across shards
//! - Stream release on every exit path
//! - Split queries partitioning a table
//! - The blocking bridge shared across threads

#[path = "../common/mod.rs"]
mod common;

mod batch_ordering;
mod blocking_threads;
mod cancellation;
mod cross_shard_transactions;
mod split_roundtrip;
mod stream_release;
