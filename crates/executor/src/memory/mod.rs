//! In-memory execution port
//!
//! [`MemoryPort`] is a complete sharded backend living in process memory:
//! keyspaces split into key-range shards, one table set per shard, and
//! shard-local transactions staged per session. It understands a small
//! select/insert/delete dialect with `:name` bind variables.
//!
//! Requests submitted from inside a tokio runtime run as spawned tasks, so
//! they can be delayed (`latency`), parked (`stall_shard`) and aborted by
//! `cancel`. Outside a runtime a request is evaluated on the spot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardgate_executor::{MemoryPort, Router};
//!
//! let port = MemoryPort::builder()
//!     .keyspace("user", ["-80", "80-"])
//!     .table("user", "users", ["id", "name"])
//!     .build()
//!     .unwrap();
//! let router = Router::new(Arc::new(port.clone()));
//! ```

mod shard;
mod statement;
mod store;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardgate_concurrency::{channel, Pending, RequestId, RequestIds, Session};
use shardgate_core::{
    Context, Error, KeyRange, KeyspaceId, QueryResult, Result, Row, RpcCode, Target, Value,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use self::shard::{Shard, Table};
use self::statement::Statement;
use self::store::{Keyspace, Store};
use crate::command::{Command, ExecutionRequest};
use crate::output::{Output, RowStream};
use crate::port::ExecutionPort;

const DEFAULT_CHUNK_ROWS: usize = 64;

/// Counters of a [`MemoryPort`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryCounters {
    /// Requests submitted
    pub submitted: u64,
    /// Sessions committed
    pub commits: u64,
    /// Sessions rolled back
    pub rollbacks: u64,
    /// `cancel` calls received
    pub cancels: u64,
    /// Streams whose producer is still running
    pub open_streams: u64,
}

/// Task currently serving a request
enum Running {
    Request(AbortHandle),
    Stream(AbortHandle),
}

impl Running {
    fn abort(&self) {
        match self {
            Running::Request(handle) | Running::Stream(handle) => handle.abort(),
        }
    }
}

struct Inner {
    ids: RequestIds,
    store: Mutex<Store>,
    running: Mutex<HashMap<RequestId, Running>>,
    cancelled: Mutex<Vec<RequestId>>,
    submitted: AtomicU64,
    cancels: AtomicU64,
    open_streams: AtomicU64,
    latency: Option<Duration>,
    chunk_rows: usize,
}

/// In-memory sharded backend implementing [`ExecutionPort`]
///
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryPort {
    inner: Arc<Inner>,
}

impl MemoryPort {
    /// Start describing a backend
    pub fn builder() -> MemoryPortBuilder {
        MemoryPortBuilder::default()
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Store a committed row on the shard owning `keyspace_id`
    pub fn seed(
        &self,
        keyspace: &str,
        table: &str,
        keyspace_id: impl Into<KeyspaceId>,
        row: Vec<Value>,
    ) -> Result<()> {
        self.inner
            .store
            .lock()
            .seed(keyspace, table, keyspace_id.into().into_bytes(), row)
    }

    /// Committed rows of `table` across every shard, in shard order
    pub fn rows(&self, keyspace: &str, table: &str) -> Result<Vec<Row>> {
        self.inner.store.lock().rows(keyspace, table)
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail every request touching `keyspace/shard` with `code`
    pub fn inject_failure(&self, keyspace: &str, shard: &str, code: RpcCode) {
        info!(target: "shardgate::memory", keyspace, shard, code = code.as_str(), "Failure injected");
        self.inner.store.lock().set_fault(keyspace, shard, Some(code));
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, keyspace: &str, shard: &str) {
        self.inner.store.lock().set_fault(keyspace, shard, None);
    }

    /// Park every request touching `keyspace/shard` until it is cancelled
    ///
    /// Only requests submitted from inside a runtime can be parked.
    pub fn stall_shard(&self, keyspace: &str, shard: &str) {
        info!(target: "shardgate::memory", keyspace, shard, "Shard stalled");
        self.inner.store.lock().set_stall(keyspace, shard, true);
    }

    /// Stop parking new requests for `keyspace/shard`
    pub fn unstall_shard(&self, keyspace: &str, shard: &str) {
        self.inner.store.lock().set_stall(keyspace, shard, false);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Shard-local transactions neither committed nor rolled back
    pub fn open_transactions(&self) -> usize {
        self.inner.store.lock().open_transactions()
    }

    /// Current counters
    pub fn counters(&self) -> MemoryCounters {
        let (commits, rollbacks) = {
            let store = self.inner.store.lock();
            (store.commits, store.rollbacks)
        };
        MemoryCounters {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            commits,
            rollbacks,
            cancels: self.inner.cancels.load(Ordering::Relaxed),
            open_streams: self.inner.open_streams.load(Ordering::Relaxed),
        }
    }

    /// Ids passed to `cancel`, in call order
    pub fn cancelled_requests(&self) -> Vec<RequestId> {
        self.inner.cancelled.lock().clone()
    }
}

impl fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPort")
            .field("counters", &self.counters())
            .finish()
    }
}

impl ExecutionPort for MemoryPort {
    fn submit(&self, _ctx: &Context, command: Command) -> Pending<Output> {
        let id = self.inner.ids.next();
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(target: "shardgate::memory", request = %id, command = command.name(), "Request submitted");

        let Ok(handle) = Handle::try_current() else {
            return Pending::ready(id, self.inner.evaluate_now(id, command));
        };

        let (completer, pending) = channel(id);
        let inner = Arc::clone(&self.inner);
        // Registered before the job can finish and deregister itself.
        let mut running = self.inner.running.lock();
        let job = handle.spawn(async move {
            inner.wait(&command).await;
            let result = match command {
                Command::StreamExecute(request) => inner.open_stream(id, &request),
                command => inner.evaluate(command),
            };
            inner.finish_request(id);
            completer.complete(result);
        });
        running.insert(id, Running::Request(job.abort_handle()));
        pending
    }

    fn cancel(&self, id: RequestId) {
        self.inner.cancels.fetch_add(1, Ordering::Relaxed);
        self.inner.cancelled.lock().push(id);
        let entry = self.inner.running.lock().remove(&id);
        if let Some(entry) = entry {
            debug!(target: "shardgate::memory", request = %id, "Request aborted");
            entry.abort();
        }
    }
}

impl Inner {
    /// Delay and park a request as configured
    async fn wait(&self, command: &Command) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let targets: Vec<&Target> = match command {
            Command::Execute(request) | Command::StreamExecute(request) => vec![&request.target],
            Command::ExecuteBatch(batch) => batch.queries.iter().map(|q| &q.target).collect(),
            _ => Vec::new(),
        };
        let stalled = self.store.lock().is_stalled(&targets);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    fn finish_request(&self, id: RequestId) {
        let mut running = self.running.lock();
        if matches!(running.get(&id), Some(Running::Request(_))) {
            running.remove(&id);
        }
    }

    /// Evaluate a non-streaming command against the store
    fn evaluate(&self, command: Command) -> Result<Output> {
        let mut store = self.store.lock();
        match command {
            Command::Execute(mut request) => match request.session.take() {
                Some(mut session) => {
                    let result = store.execute_in_session(&request, &mut session)?;
                    Ok(Output::Executed {
                        result,
                        session: Some(session),
                    })
                }
                None => Ok(Output::Executed {
                    result: store.execute(&request, None)?,
                    session: None,
                }),
            },
            Command::ExecuteBatch(batch) => {
                let (results, session) = store.execute_batch(&batch)?;
                Ok(Output::Batch { results, session })
            }
            Command::Begin => Ok(Output::Session(Session::transactional())),
            Command::Commit(session) => store.commit(&session).map(|_| Output::Unit),
            Command::Rollback(session) => store.rollback(&session).map(|_| Output::Unit),
            Command::SplitQuery(request) => store.split_query(&request).map(Output::SplitParts),
            Command::GetSrvKeyspace { keyspace } => store.srv_keyspace(&keyspace).map(Output::SrvKeyspace),
            Command::StreamExecute(_) => Err(Error::internal("streams are opened by open_stream")),
        }
    }

    /// Materialize a streamed query and cut it into chunks
    ///
    /// The first chunk carries the fields; there is always at least one.
    fn stream_chunks(&self, request: &ExecutionRequest) -> Result<Vec<QueryResult>> {
        if request.session.is_some() {
            return Err(Error::transport(
                RpcCode::BadInput,
                "streaming is not supported inside a transaction",
            ));
        }
        if Statement::parse(request.query.sql())?.is_write() {
            return Err(Error::transport(
                RpcCode::BadInput,
                "only select statements can be streamed",
            ));
        }
        let result = self.store.lock().execute(request, None)?;

        let mut chunks: Vec<QueryResult> = result
            .rows
            .chunks(self.chunk_rows)
            .map(|rows| QueryResult {
                rows: rows.to_vec(),
                ..QueryResult::default()
            })
            .collect();
        if chunks.is_empty() {
            chunks.push(QueryResult::empty());
        }
        chunks[0].fields = result.fields;
        Ok(chunks)
    }

    /// Start a producer task feeding the chunks of a streamed query
    fn open_stream(self: &Arc<Self>, id: RequestId, request: &ExecutionRequest) -> Result<Output> {
        let chunks = self.stream_chunks(request)?;
        let (tx, rx) = mpsc::channel(1);
        self.open_streams.fetch_add(1, Ordering::Relaxed);
        let guard = StreamGuard {
            inner: Arc::clone(self),
            id,
        };

        let mut running = self.running.lock();
        let producer = tokio::spawn(async move {
            let _guard = guard;
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        running.insert(id, Running::Stream(producer.abort_handle()));
        debug!(target: "shardgate::memory", request = %id, "Stream opened");
        Ok(Output::Stream(RowStream::new(id, rx)))
    }

    /// Evaluate without a runtime: the whole stream is buffered up front
    fn evaluate_now(&self, id: RequestId, command: Command) -> Result<Output> {
        match command {
            Command::StreamExecute(request) => {
                let chunks = self.stream_chunks(&request)?;
                let (tx, rx) = mpsc::channel(chunks.len());
                for chunk in chunks {
                    tx.try_send(Ok(chunk))
                        .map_err(|e| Error::internal(format!("stream buffer rejected chunk: {}", e)))?;
                }
                Ok(Output::Stream(RowStream::new(id, rx)))
            }
            command => self.evaluate(command),
        }
    }
}

/// Accounts for a stream producer however it ends
struct StreamGuard {
    inner: Arc<Inner>,
    id: RequestId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.inner.open_streams.fetch_sub(1, Ordering::Relaxed);
        let mut running = self.inner.running.lock();
        if matches!(running.get(&self.id), Some(Running::Stream(_))) {
            running.remove(&self.id);
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Describes the keyspaces and tables of a [`MemoryPort`]
#[derive(Debug, Default)]
pub struct MemoryPortBuilder {
    keyspaces: Vec<(String, Vec<String>)>,
    sharding_columns: Vec<(String, String)>,
    tables: Vec<(String, String, Vec<String>)>,
    latency: Option<Duration>,
    chunk_rows: Option<usize>,
}

impl MemoryPortBuilder {
    /// Add a keyspace split into shards named like `"-80"`, `"80-"`
    pub fn keyspace<I, S>(mut self, name: impl Into<String>, shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyspaces
            .push((name.into(), shards.into_iter().map(Into::into).collect()));
        self
    }

    /// Declare the column a keyspace is sharded by
    pub fn sharding_column(mut self, keyspace: impl Into<String>, column: impl Into<String>) -> Self {
        self.sharding_columns.push((keyspace.into(), column.into()));
        self
    }

    /// Create a table on every shard of a keyspace
    pub fn table<I, S>(mut self, keyspace: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.push((
            keyspace.into(),
            table.into(),
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Delay every request submitted from a runtime
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Rows per streamed chunk
    pub fn stream_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = Some(rows);
        self
    }

    /// Validate the layout and create the port
    ///
    /// # Errors
    ///
    /// Returns a caller error for a keyspace without shards, a duplicate
    /// keyspace, a malformed shard name, overlapping shard ranges, or a
    /// table or sharding column naming an unknown keyspace.
    pub fn build(self) -> Result<MemoryPort> {
        let chunk_rows = self.chunk_rows.unwrap_or(DEFAULT_CHUNK_ROWS);
        if chunk_rows == 0 {
            return Err(Error::caller("stream_chunk_rows must be at least 1"));
        }

        let mut keyspaces: BTreeMap<String, Keyspace> = BTreeMap::new();
        for (name, shard_names) in self.keyspaces {
            if shard_names.is_empty() {
                return Err(Error::caller(format!("keyspace '{}' has no shards", name)));
            }
            let mut shards: Vec<Shard> = Vec::with_capacity(shard_names.len());
            for shard_name in shard_names {
                let range = KeyRange::from_shard_name(&shard_name)?;
                if let Some(other) = shards.iter().find(|s| s.range.intersects(&range)) {
                    return Err(Error::caller(format!(
                        "shards '{}' and '{}' of keyspace '{}' overlap",
                        other.name, shard_name, name
                    )));
                }
                shards.push(Shard {
                    name: shard_name,
                    range,
                    tables: BTreeMap::new(),
                });
            }
            shards.sort_by(|a, b| a.range.start.cmp(&b.range.start));
            if keyspaces.contains_key(&name) {
                return Err(Error::caller(format!("keyspace '{}' declared twice", name)));
            }
            keyspaces.insert(
                name.clone(),
                Keyspace {
                    name,
                    sharding_column: None,
                    shards,
                },
            );
        }

        for (keyspace, column) in self.sharding_columns {
            unknown_keyspace(keyspaces.get_mut(&keyspace), &keyspace)?.sharding_column = Some(column);
        }
        for (keyspace, table, columns) in self.tables {
            if columns.is_empty() {
                return Err(Error::caller(format!("table '{}' has no columns", table)));
            }
            let ks = unknown_keyspace(keyspaces.get_mut(&keyspace), &keyspace)?;
            for shard in &mut ks.shards {
                shard.tables.insert(table.clone(), Table::new(columns.clone()));
            }
        }

        debug!(target: "shardgate::memory", keyspaces = keyspaces.len(), "Memory port built");
        Ok(MemoryPort {
            inner: Arc::new(Inner {
                ids: RequestIds::new(),
                store: Mutex::new(Store::new(keyspaces.into_values().collect())),
                running: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(Vec::new()),
                submitted: AtomicU64::new(0),
                cancels: AtomicU64::new(0),
                open_streams: AtomicU64::new(0),
                latency: self.latency,
                chunk_rows,
            }),
        })
    }
}

fn unknown_keyspace<'a>(keyspace: Option<&'a mut Keyspace>, name: &str) -> Result<&'a mut Keyspace> {
    keyspace.ok_or_else(|| Error::caller(format!("keyspace '{}' is not declared", name)))
}
