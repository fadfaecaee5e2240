//! Transaction scope state
//!
//! A [`TransactionScope`] tracks one caller-managed transaction across
//! shards. The backend hands out one shard-local transaction per shard the
//! scope touches; those ids travel in the [`Session`].
//!
//! State transitions:
//! - `Open` → `Committed` (commit succeeded)
//! - `Open` → `RolledBack` (rollback, or a commit that failed)
//!
//! Terminal states (no transitions allowed):
//! - `Committed`
//! - `RolledBack`
//!
//! Any operation on a scope that has left `Open` is a programming error.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardgate_core::{Error, Result, TabletRole};
use tracing::debug;

/// Shard-local transaction opened under a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSession {
    /// Keyspace of the shard
    pub keyspace: String,
    /// Shard name
    pub shard: String,
    /// Role the transaction runs against
    pub role: TabletRole,
    /// Backend transaction id on that shard
    pub transaction_id: i64,
}

/// Per-scope routing state exchanged with the backend on every call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    /// Whether executions are staged rather than autocommitted
    pub in_transaction: bool,
    /// Shard-local transactions opened so far, in the order they were opened
    pub shard_sessions: Vec<ShardSession>,
}

impl Session {
    /// A fresh transactional session with no shards touched yet
    pub fn transactional() -> Self {
        Self {
            in_transaction: true,
            shard_sessions: Vec::new(),
        }
    }

    /// Shard-local transaction for `keyspace/shard` under `role`
    pub fn find(&self, keyspace: &str, shard: &str, role: TabletRole) -> Option<&ShardSession> {
        self.shard_sessions
            .iter()
            .find(|s| s.keyspace == keyspace && s.shard == shard && s.role == role)
    }

    /// Number of shards touched
    pub fn shard_count(&self) -> usize {
        self.shard_sessions.len()
    }
}

/// Lifecycle state of a [`TransactionScope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeState {
    /// Executions are staged
    Open,
    /// All shard-local transactions were made durable
    Committed,
    /// Shard-local work was discarded
    RolledBack,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeState::Open => write!(f, "open"),
            ScopeState::Committed => write!(f, "committed"),
            ScopeState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// State machine of one caller-owned transaction
///
/// A scope has exactly one owner. Mutating methods take `&mut self`, so
/// sharing a scope between concurrent callers requires the caller's own
/// synchronization and is not supported.
#[derive(Debug)]
pub struct TransactionScope {
    id: u64,
    state: ScopeState,
    session: Session,
}

impl TransactionScope {
    /// Open a scope around the session returned by the backend's begin
    pub fn open(id: u64, session: Session) -> Self {
        debug!(target: "shardgate::txn", scope = id, "Transaction scope opened");
        Self {
            id,
            state: ScopeState::Open,
            session,
        }
    }

    /// Scope identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Check if the scope still accepts executions
    pub fn is_open(&self) -> bool {
        self.state == ScopeState::Open
    }

    /// Current session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Fail with a programming error unless the scope is open
    pub fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::programming(format!(
                "cannot {}: transaction {} is already {}",
                operation, self.id, self.state
            )))
        }
    }

    /// Record the session returned by an execution inside the scope
    pub fn update_session(&mut self, session: Session) -> Result<()> {
        self.ensure_open("update session")?;
        self.session = session;
        Ok(())
    }

    /// Transition `Open` → `Committed`
    pub fn mark_committed(&mut self) -> Result<()> {
        self.finish("commit", ScopeState::Committed)
    }

    /// Transition `Open` → `RolledBack`
    pub fn mark_rolled_back(&mut self) -> Result<()> {
        self.finish("roll back", ScopeState::RolledBack)
    }

    fn finish(&mut self, operation: &str, to: ScopeState) -> Result<()> {
        self.ensure_open(operation)?;
        self.state = to;
        self.session.in_transaction = false;
        debug!(
            target: "shardgate::txn",
            scope = self.id,
            shards = self.session.shard_count(),
            state = %to,
            "Transaction scope finished"
        );
        Ok(())
    }
}
