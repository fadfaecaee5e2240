//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shardgate::{
    channel, Command, Completer, Context, ExecutionPort, MemoryPort, Output, Pending, QueryResult,
    RequestId, RequestIds, Router, Value,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let start = Instant::now();
    while !check() {
        if start.elapsed() > Duration::from_secs(5) {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ============================================================================
// Memory backend fixture
// ============================================================================

/// Keyspace `user` with shards `-40`, `40-80`, `80-c0`, `c0-` and an
/// `orders (id, user_id, total)` table
pub fn memory_port() -> MemoryPort {
    MemoryPort::builder()
        .keyspace("user", ["-40", "40-80", "80-c0", "c0-"])
        .sharding_column("user", "user_id")
        .table("user", "orders", ["id", "user_id", "total"])
        .stream_chunk_rows(2)
        .build()
        .expect("valid layout")
}

/// Seed `count` orders spread over the key space; returns their ids
pub fn seed_orders(port: &MemoryPort, count: u8) -> Vec<i64> {
    (0..count)
        .map(|i| {
            let id = i64::from(i) + 1;
            let ksid = i.wrapping_mul(37);
            port.seed(
                "user",
                "orders",
                [ksid],
                vec![Value::Int(id), Value::Int(id % 7), Value::Int(id * 10)],
            )
            .expect("seed order");
            id
        })
        .collect()
}

pub fn router_over(port: &MemoryPort) -> Router {
    Router::new(Arc::new(port.clone()))
}

/// Sorted first-column integers of `rows`
pub fn ids(rows: &[Vec<Value>]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .filter_map(|row| match row.first() {
            Some(Value::Int(id)) => Some(*id),
            _ => None,
        })
        .collect();
    ids.sort_unstable();
    ids
}

// ============================================================================
// ScriptedPort - a port the test answers by hand
// ============================================================================

/// One submitted request waiting for the test to answer it
pub struct Submitted {
    pub id: RequestId,
    pub command: Command,
    pub completer: Completer<Output>,
}

impl Submitted {
    /// SQL text of an `Execute` command
    pub fn sql(&self) -> String {
        match &self.command {
            Command::Execute(request) => request.query.sql().to_string(),
            other => panic!("not an Execute: {}", other.name()),
        }
    }

    /// Answer an `Execute` with a single row holding `tag`
    pub fn answer_tagged(self, tag: &str) -> bool {
        self.completer.complete(Ok(Output::Executed {
            result: QueryResult {
                rows: vec![vec![Value::from(tag)]],
                ..QueryResult::default()
            },
            session: None,
        }))
    }
}

/// Port that parks every request until the test completes it, in any order
#[derive(Default)]
pub struct ScriptedPort {
    ids: RequestIds,
    inbox: Mutex<Vec<Submitted>>,
    cancelled: Mutex<Vec<RequestId>>,
}

impl ScriptedPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until at least `count` requests are parked, then take them all
    pub async fn take(&self, count: usize) -> Vec<Submitted> {
        eventually("submissions", || self.inbox.lock().len() >= count).await;
        std::mem::take(&mut *self.inbox.lock())
    }

    pub fn cancelled(&self) -> Vec<RequestId> {
        self.cancelled.lock().clone()
    }
}

impl ExecutionPort for ScriptedPort {
    fn submit(&self, _ctx: &Context, command: Command) -> Pending<Output> {
        let id = self.ids.next();
        let (completer, pending) = channel(id);
        self.inbox.lock().push(Submitted {
            id,
            command,
            completer,
        });
        pending
    }

    fn cancel(&self, id: RequestId) {
        self.cancelled.lock().push(id);
    }
}
