//! Blocking bridge over the asynchronous router.
//!
//! Every operation is implemented once, asynchronously, on [`Router`],
//! [`Tx`] and [`StreamCursor`]. The types here drive those futures to
//! completion on a runtime owned by the connection through a single
//! adapter, so the blocking surface adds no logic of its own.
//!
//! ```ignore
//! let conn = BlockingConn::new(port)?;
//! let ctx = conn.context();
//!
//! let rows = conn.execute_shards(&ctx, conn.query("select * from users"), "user", ["-80"])?;
//!
//! let mut tx = conn.begin(&ctx)?;
//! tx.execute_keyspace_ids(&ctx, conn.query("insert into users (id) values (:id)").bind("id", 1i64), "user", [[0x10]])?;
//! tx.commit(&ctx)?;
//! ```
//!
//! Blocking calls must not be made from inside an async runtime; they fail
//! with a programming error instead of stalling the runtime's thread.

use std::future::Future;
use std::sync::Arc;

use shardgate_concurrency::{ScopeState, Session};
use shardgate_core::{
    BoundQuery, Context, Error, Field, KeyRange, KeyspaceId, QueryResult, Result, Row, SplitPart,
    SrvKeyspace, Target,
};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use crate::command::BatchQuery;
use crate::config::ClientConfig;
use crate::port::ExecutionPort;
use crate::router::Router;
use crate::stats::StatsSnapshot;
use crate::stream::StreamCursor;
use crate::transaction::Tx;

// =============================================================================
// Runtime bridge
// =============================================================================

/// Runtime shared by a connection and every handle it gives out
struct Bridge {
    runtime: Option<Runtime>,
}

impl Bridge {
    fn start(config: &ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| Error::internal(format!("Failed to start client runtime: {}", e)))?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Drive `call` to completion on the bridge runtime
    fn wait<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        if Handle::try_current().is_ok() {
            return Err(Error::programming(
                "blocking call made from inside an async runtime; use the async Router instead",
            ));
        }
        match &self.runtime {
            Some(runtime) => runtime.block_on(call),
            None => Err(Error::programming("client runtime is shut down")),
        }
    }

    /// Run `f` with the bridge runtime as the current runtime
    fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.runtime {
            Some(runtime) => {
                let _guard = runtime.enter();
                f()
            }
            None => f(),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

// =============================================================================
// BlockingConn
// =============================================================================

/// Blocking connection: every router operation as a blocking call
///
/// # Thread Safety
///
/// `BlockingConn` is `Send + Sync`; several threads may issue calls on the
/// same connection concurrently.
pub struct BlockingConn {
    router: Router,
    config: ClientConfig,
    bridge: Option<Arc<Bridge>>,
}

impl BlockingConn {
    /// Connect over `port` with the default configuration
    pub fn new(port: Arc<dyn ExecutionPort>) -> Result<Self> {
        Self::with_config(port, ClientConfig::default())
    }

    /// Connect over `port` with `config`
    pub fn with_config(port: Arc<dyn ExecutionPort>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let bridge = Bridge::start(&config)?;
        info!(
            target: "shardgate::router",
            worker_threads = config.worker_threads,
            "Blocking client started"
        );
        Ok(Self {
            router: Router::new(port),
            config,
            bridge: Some(Arc::new(bridge)),
        })
    }

    /// The asynchronous router behind this connection
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Configuration in effect
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.router.stats()
    }

    /// A fresh context carrying the configured default deadline
    pub fn context(&self) -> Context {
        match self.config.default_timeout() {
            Some(timeout) => Context::background().with_timeout(timeout),
            None => Context::background(),
        }
    }

    /// A query envelope stamped with the configured default role
    pub fn query(&self, sql: impl Into<String>) -> BoundQuery {
        let role = self.config.role().unwrap_or_default();
        BoundQuery::new(sql).with_role(role)
    }

    fn bridge(&self) -> Result<&Arc<Bridge>> {
        self.bridge
            .as_ref()
            .ok_or_else(|| Error::programming("connection is closed"))
    }

    fn wait<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.bridge()?.wait(call)
    }

    /// Shut the connection down
    ///
    /// Later calls on this connection fail with a programming error.
    /// Transactions and cursors already handed out keep the runtime alive
    /// until they are dropped.
    pub fn close(&mut self) {
        if self.bridge.take().is_some() {
            debug!(target: "shardgate::router", "Blocking client closed");
        }
    }

    /// Check if [`BlockingConn::close`] was called
    pub fn is_closed(&self) -> bool {
        self.bridge.is_none()
    }

    // =========================================================================
    // Single execution
    // =========================================================================

    /// Blocking [`Router::execute`]
    pub fn execute(&self, ctx: &Context, query: BoundQuery, target: Target) -> Result<QueryResult> {
        self.wait(self.router.execute(ctx, query, target))
    }

    /// Blocking [`Router::execute_shards`]
    pub fn execute_shards<I, S>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        shards: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(ctx, query, Target::shards(keyspace, shards))
    }

    /// Blocking [`Router::execute_keyspace_ids`]
    pub fn execute_keyspace_ids<I, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ids: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        self.execute(ctx, query, Target::keyspace_ids(keyspace, ids))
    }

    /// Blocking [`Router::execute_key_ranges`]
    pub fn execute_key_ranges(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<QueryResult> {
        self.execute(ctx, query, Target::key_ranges(keyspace, ranges))
    }

    /// Blocking [`Router::execute_entity_ids`]
    pub fn execute_entity_ids<I, E, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        entity_column: &str,
        mapping: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<Vec<u8>>,
        K: Into<KeyspaceId>,
    {
        self.execute(ctx, query, Target::entity_ids(keyspace, entity_column, mapping))
    }

    // =========================================================================
    // Batch execution
    // =========================================================================

    /// Blocking [`Router::execute_batch`]
    pub fn execute_batch(
        &self,
        ctx: &Context,
        queries: Vec<BatchQuery>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>> {
        self.wait(self.router.execute_batch(ctx, queries, as_transaction))
    }

    /// Blocking [`Router::execute_batch_shards`]
    pub fn execute_batch_shards<I, S>(
        &self,
        ctx: &Context,
        queries: Vec<(BoundQuery, &str, I)>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait(self.router.execute_batch_shards(ctx, queries, as_transaction))
    }

    /// Blocking [`Router::execute_batch_keyspace_ids`]
    pub fn execute_batch_keyspace_ids<I, K>(
        &self,
        ctx: &Context,
        queries: Vec<(BoundQuery, &str, I)>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        self.wait(
            self.router
                .execute_batch_keyspace_ids(ctx, queries, as_transaction),
        )
    }

    // =========================================================================
    // Streaming execution
    // =========================================================================

    /// Blocking [`Router::stream_execute`]
    ///
    /// Returns once the first chunk has arrived. The cursor blocks on each
    /// advance that needs a new chunk.
    pub fn stream_execute(&self, ctx: &Context, query: BoundQuery, target: Target) -> Result<BlockingCursor> {
        let bridge = Arc::clone(self.bridge()?);
        let cursor = bridge.wait(self.router.stream_execute(ctx, query, target))?;
        Ok(BlockingCursor {
            bridge,
            ctx: ctx.clone(),
            cursor: Some(cursor),
        })
    }

    /// Blocking [`Router::stream_execute_shards`]
    pub fn stream_execute_shards<I, S>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        shards: I,
    ) -> Result<BlockingCursor>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_execute(ctx, query, Target::shards(keyspace, shards))
    }

    /// Blocking [`Router::stream_execute_keyspace_ids`]
    pub fn stream_execute_keyspace_ids<I, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ids: I,
    ) -> Result<BlockingCursor>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        self.stream_execute(ctx, query, Target::keyspace_ids(keyspace, ids))
    }

    /// Blocking [`Router::stream_execute_key_ranges`]
    pub fn stream_execute_key_ranges(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<BlockingCursor> {
        self.stream_execute(ctx, query, Target::key_ranges(keyspace, ranges))
    }

    /// Blocking [`Router::stream_execute_entity_ids`]
    pub fn stream_execute_entity_ids<I, E, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        entity_column: &str,
        mapping: I,
    ) -> Result<BlockingCursor>
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<Vec<u8>>,
        K: Into<KeyspaceId>,
    {
        self.stream_execute(ctx, query, Target::entity_ids(keyspace, entity_column, mapping))
    }

    // =========================================================================
    // Transactions and metadata
    // =========================================================================

    /// Blocking [`Router::begin`]
    pub fn begin(&self, ctx: &Context) -> Result<BlockingTx> {
        let bridge = Arc::clone(self.bridge()?);
        let tx = bridge.wait(self.router.begin(ctx))?;
        Ok(BlockingTx {
            bridge,
            tx: Some(tx),
        })
    }

    /// Blocking [`Router::split_query`]
    pub fn split_query(
        &self,
        ctx: &Context,
        keyspace: &str,
        query: BoundQuery,
        split_column: &str,
        split_count: u32,
    ) -> Result<Vec<SplitPart>> {
        self.wait(
            self.router
                .split_query(ctx, keyspace, query, split_column, split_count),
        )
    }

    /// Blocking [`Router::get_srv_keyspace`]
    pub fn get_srv_keyspace(&self, ctx: &Context, keyspace: &str) -> Result<SrvKeyspace> {
        self.wait(self.router.get_srv_keyspace(ctx, keyspace))
    }
}

impl std::fmt::Debug for BlockingConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingConn")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// BlockingTx
// =============================================================================

/// Blocking transaction scope
///
/// Single owner, like [`Tx`]. Dropping it while open rolls it back without
/// waiting.
pub struct BlockingTx {
    bridge: Arc<Bridge>,
    tx: Option<Tx>,
}

impl BlockingTx {
    fn parts(&mut self) -> Result<(&Bridge, &mut Tx)> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| Error::programming("transaction handle is gone"))?;
        Ok((self.bridge.as_ref(), tx))
    }

    /// Scope identity
    pub fn id(&self) -> u64 {
        self.tx.as_ref().map_or(0, Tx::id)
    }

    /// Current state
    pub fn state(&self) -> ScopeState {
        self.tx.as_ref().map_or(ScopeState::RolledBack, Tx::state)
    }

    /// Session carrying the shard-local transaction ids
    pub fn session(&self) -> Option<&Session> {
        self.tx.as_ref().map(Tx::session)
    }

    /// Blocking [`Tx::execute`]
    pub fn execute(&mut self, ctx: &Context, query: BoundQuery, target: Target) -> Result<QueryResult> {
        let (bridge, tx) = self.parts()?;
        bridge.wait(tx.execute(ctx, query, target))
    }

    /// Blocking [`Tx::execute_shards`]
    pub fn execute_shards<I, S>(
        &mut self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        shards: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(ctx, query, Target::shards(keyspace, shards))
    }

    /// Blocking [`Tx::execute_keyspace_ids`]
    pub fn execute_keyspace_ids<I, K>(
        &mut self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ids: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        self.execute(ctx, query, Target::keyspace_ids(keyspace, ids))
    }

    /// Blocking [`Tx::execute_key_ranges`]
    pub fn execute_key_ranges(
        &mut self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<QueryResult> {
        self.execute(ctx, query, Target::key_ranges(keyspace, ranges))
    }

    /// Blocking [`Tx::execute_entity_ids`]
    pub fn execute_entity_ids<I, E, K>(
        &mut self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        entity_column: &str,
        mapping: I,
    ) -> Result<QueryResult>
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<Vec<u8>>,
        K: Into<KeyspaceId>,
    {
        self.execute(ctx, query, Target::entity_ids(keyspace, entity_column, mapping))
    }

    /// Blocking [`Tx::execute_batch`]
    pub fn execute_batch(&mut self, ctx: &Context, queries: Vec<BatchQuery>) -> Result<Vec<QueryResult>> {
        let (bridge, tx) = self.parts()?;
        bridge.wait(tx.execute_batch(ctx, queries))
    }

    /// Blocking [`Tx::commit`]
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        let (bridge, tx) = self.parts()?;
        bridge.wait(tx.commit(ctx))
    }

    /// Blocking [`Tx::rollback`]
    pub fn rollback(&mut self, ctx: &Context) -> Result<()> {
        let (bridge, tx) = self.parts()?;
        bridge.wait(tx.rollback(ctx))
    }
}

impl Drop for BlockingTx {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // A leaked scope submits its rollback from Drop; the port may
            // need the runtime to be current for that.
            self.bridge.enter(move || drop(tx));
        }
    }
}

impl std::fmt::Debug for BlockingTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingTx").field("tx", &self.tx).finish()
    }
}

// =============================================================================
// BlockingCursor
// =============================================================================

/// Blocking streaming cursor
///
/// Iterating yields one row per item. Each advance that needs a new chunk
/// blocks until it arrives, the stream ends, or the cursor's context fires.
pub struct BlockingCursor {
    bridge: Arc<Bridge>,
    ctx: Context,
    cursor: Option<StreamCursor>,
}

impl BlockingCursor {
    /// Column metadata
    pub fn fields(&self) -> &[Field] {
        self.cursor.as_ref().map_or(&[][..], StreamCursor::fields)
    }

    /// Next row, or `None` once the stream has ended
    ///
    /// Fails with a programming error after [`BlockingCursor::close`].
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| Error::programming("stream cursor is gone"))?;
        self.bridge.wait(cursor.next_row(&self.ctx))
    }

    /// Release the stream; idempotent
    pub fn close(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.close();
        }
    }

    /// Check if [`BlockingCursor::close`] was called
    pub fn is_closed(&self) -> bool {
        self.cursor.as_ref().map_or(true, StreamCursor::is_closed)
    }
}

impl Iterator for BlockingCursor {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for BlockingCursor {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.bridge.enter(move || drop(cursor));
        }
    }
}

impl std::fmt::Debug for BlockingCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingCursor")
            .field("cursor", &self.cursor)
            .finish()
    }
}
