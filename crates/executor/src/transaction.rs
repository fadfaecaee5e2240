//! Caller-managed transactions.
//!
//! A [`Tx`] wraps a [`TransactionScope`] and routes every execution through
//! the scope's session, so the backend stages the work in one shard-local
//! transaction per touched shard until the scope is committed or rolled
//! back.
//!
//! # Usage
//!
//! ```ignore
//! let mut tx = router.begin(&ctx).await?;
//!
//! tx.execute_keyspace_ids(&ctx, insert, "user", [ksid]).await?;
//! let staged = tx.execute_keyspace_ids(&ctx, select, "user", [ksid]).await?;
//!
//! tx.commit(&ctx).await?;
//! ```
//!
//! # Ownership
//!
//! A scope has exactly one logical owner. Every method takes `&mut self`,
//! so concurrent use of one `Tx` from several tasks is impossible without
//! the caller adding its own lock, and doing so is not supported: the
//! session would be updated out of order.

use shardgate_concurrency::{ScopeState, Session, TransactionScope};
use shardgate_core::{BoundQuery, Context, Error, KeyRange, KeyspaceId, QueryResult, Result, Target};
use tracing::{debug, info, warn};

use crate::command::BatchQuery;
use crate::router::Router;
use crate::{Command, Output};

/// An open transaction scope
///
/// Dropping a `Tx` that is still open counts it as leaked and submits a
/// rollback without waiting for it.
pub struct Tx {
    router: Router,
    scope: TransactionScope,
}

impl Tx {
    pub(crate) fn new(router: Router, scope: TransactionScope) -> Self {
        info!(target: "shardgate::txn", scope = scope.id(), "Transaction begun");
        Self { router, scope }
    }

    /// Scope identity
    pub fn id(&self) -> u64 {
        self.scope.id()
    }

    /// Current state
    pub fn state(&self) -> ScopeState {
        self.scope.state()
    }

    /// Check if the scope still accepts executions
    pub fn is_open(&self) -> bool {
        self.scope.is_open()
    }

    /// Session carrying the shard-local transaction ids
    pub fn session(&self) -> &Session {
        self.scope.session()
    }

    // =========================================================================
    // Executions
    // =========================================================================

    /// Execute `query` against `target` inside the transaction
    pub async fn execute(&mut self, ctx: &Context, query: BoundQuery, target: Target) -> Result<QueryResult> {
        self.scope.ensure_open("execute")?;
        let session = self.scope.session().clone();
        let (result, session) = self.router.run(ctx, query, target, Some(session)).await?;
        self.absorb(session)?;
        Ok(result)
    }

    /// Execute against explicit shards inside the transaction
    pub async fn execute_shards<I, S>(
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
        self.execute(ctx, query, Target::shards(keyspace, shards)).await
    }

    /// Execute against the shards owning `ids` inside the transaction
    pub async fn execute_keyspace_ids<I, K>(
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
        self.execute(ctx, query, Target::keyspace_ids(keyspace, ids)).await
    }

    /// Execute against the shards overlapping `ranges` inside the transaction
    pub async fn execute_key_ranges(
        &mut self,
        ctx: &Context,
        query: BoundQuery,
        keyspace: &str,
        ranges: impl IntoIterator<Item = KeyRange>,
    ) -> Result<QueryResult> {
        self.execute(ctx, query, Target::key_ranges(keyspace, ranges)).await
    }

    /// Execute against entity ids inside the transaction
    pub async fn execute_entity_ids<I, E, K>(
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
            .await
    }

    /// Execute a batch inside the transaction
    ///
    /// The enclosing scope already makes the work atomic, so the batch is
    /// sent as one ordered request without a transaction of its own.
    pub async fn execute_batch(&mut self, ctx: &Context, queries: Vec<BatchQuery>) -> Result<Vec<QueryResult>> {
        self.scope.ensure_open("execute batch")?;
        let session = self.scope.session().clone();
        let (results, session) = self
            .router
            .run_batch(ctx, queries, false, Some(session))
            .await?;
        self.absorb(session)?;
        Ok(results)
    }

    fn absorb(&mut self, session: Option<Session>) -> Result<()> {
        match session {
            Some(session) => self.scope.update_session(session),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Make every shard-local transaction durable
    ///
    /// Valid only while open. If the commit fails on any shard the scope
    /// moves to rolled back, a rollback is submitted for whatever the
    /// backend still holds, and the failure is returned as a transaction
    /// error (or a cancellation error if the context fired).
    pub async fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.scope.ensure_open("commit")?;
        let session = self.scope.session().clone();
        let shards = session.shard_count();

        let outcome = self
            .router
            .call(ctx, Command::Commit(session.clone()))
            .await
            .and_then(Output::into_unit);

        match outcome {
            Ok(()) => {
                self.scope.mark_committed()?;
                self.router.stats_handle().txn_committed();
                info!(target: "shardgate::txn", scope = self.id(), shards, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.scope.mark_rolled_back()?;
                self.router.stats_handle().txn_rolled_back();
                warn!(
                    target: "shardgate::txn",
                    scope = self.id(),
                    shards,
                    error = %e,
                    "Commit failed, transaction rolled back"
                );
                self.router.abandon_session(session);
                if e.is_cancelled() {
                    Err(e)
                } else {
                    Err(Error::transaction(format!(
                        "commit of transaction {} failed: {}",
                        self.id(),
                        e
                    )))
                }
            }
        }
    }

    /// Discard every shard-local transaction
    ///
    /// Valid only while open. The scope moves to rolled back even when the
    /// backend reports a failure; that failure is still returned.
    pub async fn rollback(&mut self, ctx: &Context) -> Result<()> {
        self.scope.ensure_open("roll back")?;
        let session = self.scope.session().clone();
        self.scope.mark_rolled_back()?;
        self.router.stats_handle().txn_rolled_back();

        let outcome = self
            .router
            .call(ctx, Command::Rollback(session))
            .await
            .and_then(Output::into_unit);

        match outcome {
            Ok(()) => {
                debug!(target: "shardgate::txn", scope = self.id(), "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                warn!(target: "shardgate::txn", scope = self.id(), error = %e, "Rollback failed");
                if e.is_cancelled() {
                    Err(e)
                } else {
                    Err(Error::transaction(format!(
                        "rollback of transaction {} failed: {}",
                        self.id(),
                        e
                    )))
                }
            }
        }
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.scope.is_open() {
            warn!(
                target: "shardgate::txn",
                scope = self.id(),
                shards = self.scope.session().shard_count(),
                "Transaction dropped while open, rolling back"
            );
            self.router.stats_handle().txn_leaked();
            self.router.abandon_session(self.scope.session().clone());
        }
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("shards", &self.scope.session().shard_count())
            .finish()
    }
}
