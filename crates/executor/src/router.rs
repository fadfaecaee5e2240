//! The Router - asynchronous entry point for every call.
//!
//! The Router turns a (query, target) pair into commands for the execution
//! port and reassembles the answers. It is stateless apart from shared
//! counters: every call builds fresh requests and nothing is remembered
//! between calls.
//!
//! Every targeted call follows the same path:
//!
//! 1. Validate the query envelope and target (caller errors, no I/O)
//! 2. Answer an empty target locally with an empty result
//! 3. Dispatch through the port, racing the caller's context

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shardgate_concurrency::{Session, TransactionScope};
use shardgate_core::{
    BoundQuery, Context, Error, KeyRange, KeyspaceId, QueryResult, Result, RpcCode, SplitPart,
    SrvKeyspace, Target,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::command::{BatchQuery, BatchRequest, ExecutionRequest, SplitQueryRequest};
use crate::port::{dispatch, ExecutionPort};
use crate::stats::{Stats, StatsSnapshot};
use crate::stream::StreamCursor;
use crate::transaction::Tx;
use crate::{Command, Output};

/// Asynchronous router over an execution port
///
/// Cloning is cheap; clones share the port and the counters.
///
/// # Example
///
/// ```ignore
/// let router = Router::new(port);
/// let ctx = Context::background().with_timeout(Duration::from_secs(1));
///
/// let users = router
///     .execute_shards(&ctx, BoundQuery::new("select * from users"), "user", ["-80", "80-"])
///     .await?;
/// ```
#[derive(Clone)]
pub struct Router {
    port: Arc<dyn ExecutionPort>,
    stats: Arc<Stats>,
    scope_ids: Arc<AtomicU64>,
}

impl Router {
    /// Create a router over `port`
    pub fn new(port: Arc<dyn ExecutionPort>) -> Self {
        Self {
            port,
            stats: Arc::new(Stats::new()),
            scope_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The underlying port
    pub fn port(&self) -> &Arc<dyn ExecutionPort> {
        &self.port
    }

    /// Current call statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> &Arc<Stats> {
        &self.stats
    }

    // =========================================================================
    // Single execution
    // =========================================================================

    /// Execute `query` against `target` and materialize the result
    ///
    /// Rows are the concatenation, in target order, of every targeted
    /// shard's rows. Any shard failure fails the whole call.
    pub async fn execute(&self, ctx: &Context, query: BoundQuery, target: Target) -> Result<QueryResult> {
        let (result, _) = self.run(ctx, query, target, None).await?;
        Ok(result)
    }

    /// Execute against explicit shards
    pub async fn execute_shards<I, S>(
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
        self.execute(ctx, query, Target::shards(keyspace, shards)).await
    }

    /// Execute against the shards owning `ids`
    pub async fn execute_keyspace_ids<I, K>(
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
        self.execute(ctx, query, Target::keyspace_ids(keyspace, ids)).await
    }

    /// Execute against the shards overlapping `ranges`
    pub async fn execute_key_ranges(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<QueryResult> {
        self.execute(ctx, query, Target::key_ranges(keyspace, ranges)).await
    }

    /// Execute against the shards owning the keyspace ids of `mapping`
    pub async fn execute_entity_ids<I, E, K>(
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
            .await
    }

    /// Execute one query, optionally inside a transaction session
    ///
    /// Returns the session the port handed back, or the input session when
    /// nothing was sent.
    pub(crate) async fn run(
        &self,
        ctx: &Context,
        query: BoundQuery,
        target: Target,
        session: Option<Session>,
    ) -> Result<(QueryResult, Option<Session>)> {
        query.validate()?;
        target.validate()?;

        if target.is_empty() {
            self.short_circuit(&target);
            return Ok((QueryResult::empty(), session));
        }

        let mut request = ExecutionRequest::single(query, target);
        request.session = session;
        self.call(ctx, Command::Execute(request))
            .await?
            .into_executed()
    }

    // =========================================================================
    // Batch execution
    // =========================================================================

    /// Execute a batch, returning one result per element in input order
    ///
    /// With `as_transaction` the port wraps the whole batch in one
    /// transaction per touched shard and commits only if every element
    /// succeeded. Without it the elements run concurrently and
    /// independently. Every element runs to completion and keeps its
    /// effects; the first failure observed fails the call.
    pub async fn execute_batch(
        &self,
        ctx: &Context,
        queries: Vec<BatchQuery>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>> {
        let (results, _) = self.run_batch(ctx, queries, as_transaction, None).await?;
        Ok(results)
    }

    /// Execute a batch where every element targets explicit shards
    pub async fn execute_batch_shards<I, S>(
        &self,
        ctx: &Context,
        queries: Vec<(BoundQuery, &str, I)>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batch = queries
            .into_iter()
            .map(|(query, keyspace, shards)| BatchQuery::new(query, Target::shards(keyspace, shards)))
            .collect();
        self.execute_batch(ctx, batch, as_transaction).await
    }

    /// Execute a batch where every element targets keyspace ids
    pub async fn execute_batch_keyspace_ids<I, K>(
        &self,
        ctx: &Context,
        queries: Vec<(BoundQuery, &str, I)>,
        as_transaction: bool,
    ) -> Result<Vec<QueryResult>>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        let batch = queries
            .into_iter()
            .map(|(query, keyspace, ids)| BatchQuery::new(query, Target::keyspace_ids(keyspace, ids)))
            .collect();
        self.execute_batch(ctx, batch, as_transaction).await
    }

    /// Execute a batch, optionally inside a transaction session
    ///
    /// Inside a session the batch always travels as one `ExecuteBatch`
    /// command so the port sees a single ordered sequence of session updates.
    pub(crate) async fn run_batch(
        &self,
        ctx: &Context,
        queries: Vec<BatchQuery>,
        as_transaction: bool,
        session: Option<Session>,
    ) -> Result<(Vec<QueryResult>, Option<Session>)> {
        for (index, element) in queries.iter().enumerate() {
            element
                .query
                .validate()
                .and_then(|_| element.target.validate())
                .map_err(|e| e.in_batch(index))?;
        }

        if queries.is_empty() {
            return Ok((Vec::new(), session));
        }

        // Elements with empty targets are answered locally; only the rest
        // reach the port, and their answers are slotted back by position.
        let total = queries.len();
        let mut positions = Vec::with_capacity(total);
        let mut live = Vec::with_capacity(total);
        for (index, element) in queries.into_iter().enumerate() {
            if element.target.is_empty() {
                self.short_circuit(&element.target);
            } else {
                positions.push(index);
                live.push(element);
            }
        }
        if live.is_empty() {
            return Ok((vec![QueryResult::empty(); total], session));
        }

        let (answers, session) = if as_transaction || session.is_some() {
            let request = BatchRequest {
                queries: live,
                as_transaction,
                session,
            };
            let (answers, session) = self
                .call(ctx, Command::ExecuteBatch(request))
                .await?
                .into_batch()?;
            if answers.len() != positions.len() {
                return Err(Error::transport(
                    RpcCode::InternalError,
                    format!(
                        "execution port answered {} results for a batch of {}",
                        answers.len(),
                        positions.len()
                    ),
                ));
            }
            (answers, session)
        } else {
            (self.fan_out(ctx, live, &positions).await?, None)
        };

        let mut results = vec![QueryResult::empty(); total];
        for (position, answer) in positions.into_iter().zip(answers) {
            results[position] = answer;
        }
        Ok((results, session))
    }

    /// Run independent elements concurrently and collect them in input order
    async fn fan_out(
        &self,
        ctx: &Context,
        live: Vec<BatchQuery>,
        positions: &[usize],
    ) -> Result<Vec<QueryResult>> {
        let mut tasks = JoinSet::new();
        for (slot, element) in live.into_iter().enumerate() {
            let router = self.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let outcome = router.run(&ctx, element.query, element.target, None).await;
                (slot, outcome)
            });
        }

        // Every element runs to completion: a failure fails the call but
        // never withdraws the independent requests still in flight.
        let mut answers: Vec<Option<QueryResult>> = vec![None; positions.len()];
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| Error::internal(format!("batch element task failed: {}", e)))
                .and_then(|(slot, outcome)| match outcome {
                    Ok((result, _)) => {
                        answers[slot] = Some(result);
                        Ok(())
                    }
                    Err(e) => Err(e.in_batch(positions[slot])),
                });
            if let Err(e) = outcome {
                if first_error.is_none() {
                    debug!(target: "shardgate::router", error = %e, "Batch element failed");
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        answers
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::internal("batch element finished without a result"))
    }

    // =========================================================================
    // Streaming execution
    // =========================================================================

    /// Stream the rows of `query` against `target`
    ///
    /// Returns once the first chunk (or the end of the stream) has arrived.
    /// Rows of different shards may interleave. Streams never take part in a
    /// transaction.
    pub async fn stream_execute(
        &self,
        ctx: &Context,
        query: BoundQuery,
        target: Target,
    ) -> Result<StreamCursor> {
        query.validate()?;
        target.validate()?;

        if target.is_empty() {
            self.short_circuit(&target);
            return Ok(StreamCursor::exhausted());
        }

        let stream = self
            .call(ctx, Command::StreamExecute(ExecutionRequest::stream(query, target)))
            .await?
            .into_stream()?;
        StreamCursor::open(ctx, Arc::clone(&self.port), Arc::clone(&self.stats), stream).await
    }

    /// Stream against explicit shards
    pub async fn stream_execute_shards<I, S>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        shards: I,
    ) -> Result<StreamCursor>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_execute(ctx, query, Target::shards(keyspace, shards))
            .await
    }

    /// Stream against the shards owning `ids`
    pub async fn stream_execute_keyspace_ids<I, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ids: I,
    ) -> Result<StreamCursor>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        self.stream_execute(ctx, query, Target::keyspace_ids(keyspace, ids))
            .await
    }

    /// Stream against the shards overlapping `ranges`
    pub async fn stream_execute_key_ranges(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<StreamCursor> {
        self.stream_execute(ctx, query, Target::key_ranges(keyspace, ranges))
            .await
    }

    /// Stream against the shards owning the keyspace ids of `mapping`
    pub async fn stream_execute_entity_ids<I, E, K>(
        &self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        entity_column: &str,
        mapping: I,
    ) -> Result<StreamCursor>
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<Vec<u8>>,
        K: Into<KeyspaceId>,
    {
        self.stream_execute(ctx, query, Target::entity_ids(keyspace, entity_column, mapping))
            .await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a transaction scope
    ///
    /// Executions issued through the returned [`Tx`] are staged until it is
    /// committed or rolled back. Executions issued through the router
    /// directly are autocommitted and never join an open scope.
    pub async fn begin(&self, ctx: &Context) -> Result<Tx> {
        let session = self.call(ctx, Command::Begin).await?.into_session()?;
        let id = self.scope_ids.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.txn_begun();
        Ok(Tx::new(self.clone(), TransactionScope::open(id, session)))
    }

    /// Submit a rollback for `session` without waiting for its outcome
    pub(crate) fn abandon_session(&self, session: Session) {
        drop(self.port.submit(&Context::background(), Command::Rollback(session)));
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Split a full-table scan into key-range parts
    ///
    /// Each part can be executed independently with
    /// [`Router::execute_key_ranges`]; together they cover the full
    /// query's rows.
    pub async fn split_query(
        &self,
        ctx: &Context,
        keyspace: &str,
        query: BoundQuery,
        split_column: &str,
        split_count: u32,
    ) -> Result<Vec<SplitPart>> {
        require_keyspace(keyspace)?;
        query.validate()?;
        if split_count == 0 {
            return Err(Error::caller("split count must be positive"));
        }

        let request = SplitQueryRequest {
            keyspace: keyspace.to_string(),
            query,
            split_column: split_column.to_string(),
            split_count,
        };
        self.call(ctx, Command::SplitQuery(request))
            .await?
            .into_split_parts()
    }

    /// Serving topology of `keyspace`
    pub async fn get_srv_keyspace(&self, ctx: &Context, keyspace: &str) -> Result<SrvKeyspace> {
        require_keyspace(keyspace)?;
        self.call(
            ctx,
            Command::GetSrvKeyspace {
                keyspace: keyspace.to_string(),
            },
        )
        .await?
        .into_srv_keyspace()
    }

    // =========================================================================
    // Dispatch helpers
    // =========================================================================

    pub(crate) async fn call(&self, ctx: &Context, command: Command) -> Result<Output> {
        let name = command.name();
        self.stats.call_started();
        let outcome = dispatch(self.port.as_ref(), ctx, command).await;
        self.stats.call_finished(&outcome);

        match &outcome {
            Ok(_) => debug!(target: "shardgate::router", command = name, "Call completed"),
            Err(e) if e.is_cancelled() => {
                debug!(target: "shardgate::router", command = name, error = %e, "Call cancelled")
            }
            Err(e) => warn!(target: "shardgate::router", command = name, error = %e, "Call failed"),
        }
        outcome
    }

    fn short_circuit(&self, target: &Target) {
        self.stats.short_circuit();
        debug!(
            target: "shardgate::router",
            keyspace = %target.keyspace(),
            kind = %target.kind(),
            "Empty target answered without a backend call"
        );
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

fn require_keyspace(keyspace: &str) -> Result<()> {
    if keyspace.trim().is_empty() {
        Err(Error::caller("keyspace is empty"))
    } else {
        Ok(())
    }
}
