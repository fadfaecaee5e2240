//! Keyspaces, shard-local transactions and command evaluation of the
//! in-memory backend.
//!
//! Everything here runs under the port's lock and never awaits. A call
//! that touches several shards checks every shard for injected failures
//! before changing anything, so a failed call leaves no partial effects.

use std::collections::{BTreeSet, HashMap, HashSet};

use shardgate_concurrency::{Session, ShardSession};
use shardgate_core::{
    BoundQuery, Error, KeyRange, KeyspacePartition, QueryResult, Result, Row, RpcCode,
    ShardReference, SplitPart, SrvKeyspace, TabletRole, Target, Value,
};
use tracing::debug;

use super::shard::{project, RowFilter, Scope, Shard, StoredRow, Write};
use super::statement::{Projection, Statement};
use crate::command::{BatchRequest, ExecutionRequest, SplitQueryRequest};

#[derive(Debug, Clone)]
pub(crate) struct Keyspace {
    pub name: String,
    pub sharding_column: Option<String>,
    pub shards: Vec<Shard>,
}

/// Writes staged by one shard-local transaction
#[derive(Debug)]
struct Staged {
    keyspace: String,
    shard: String,
    writes: Vec<Write>,
}

#[derive(Debug)]
pub(crate) struct Store {
    keyspaces: Vec<Keyspace>,
    transactions: HashMap<i64, Staged>,
    next_txid: i64,
    faults: HashMap<(String, String), RpcCode>,
    stalls: HashSet<(String, String)>,
    pub commits: u64,
    pub rollbacks: u64,
}

type ShardPlan = Vec<(usize, Scope)>;

impl Store {
    pub(crate) fn new(keyspaces: Vec<Keyspace>) -> Self {
        Self {
            keyspaces,
            transactions: HashMap::new(),
            next_txid: 0,
            faults: HashMap::new(),
            stalls: HashSet::new(),
            commits: 0,
            rollbacks: 0,
        }
    }

    // =========================================================================
    // Test controls
    // =========================================================================

    pub(crate) fn set_fault(&mut self, keyspace: &str, shard: &str, code: Option<RpcCode>) {
        let key = (keyspace.to_string(), shard.to_string());
        match code {
            Some(code) => {
                self.faults.insert(key, code);
            }
            None => {
                self.faults.remove(&key);
            }
        }
    }

    pub(crate) fn set_stall(&mut self, keyspace: &str, shard: &str, stalled: bool) {
        let key = (keyspace.to_string(), shard.to_string());
        if stalled {
            self.stalls.insert(key);
        } else {
            self.stalls.remove(&key);
        }
    }

    pub(crate) fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Check if an `Execute`/`StreamExecute`/`ExecuteBatch` touches a stalled shard
    pub(crate) fn is_stalled(&self, targets: &[&Target]) -> bool {
        if self.stalls.is_empty() {
            return false;
        }
        targets.iter().any(|target| {
            let Ok((ks, plan)) = self.plan(target) else {
                return false;
            };
            plan.iter().any(|(i, _)| {
                let key = (ks.name.clone(), ks.shards[*i].name.clone());
                self.stalls.contains(&key)
            })
        })
    }

    pub(crate) fn seed(&mut self, keyspace: &str, table: &str, ksid: Vec<u8>, values: Row) -> Result<()> {
        let ks = self.keyspace_mut(keyspace)?;
        let shard = ks
            .shards
            .iter_mut()
            .find(|s| s.range.contains(&ksid))
            .ok_or_else(|| Error::caller(format!("no shard of '{}' owns that keyspace id", keyspace)))?;
        let table = shard
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::caller(format!("table '{}' does not exist", table)))?;
        if values.len() != table.columns.len() {
            return Err(Error::caller(format!(
                "row has {} values, table has {} columns",
                values.len(),
                table.columns.len()
            )));
        }
        table.rows.push(StoredRow { ksid, values });
        Ok(())
    }

    pub(crate) fn rows(&self, keyspace: &str, table: &str) -> Result<Vec<Row>> {
        let ks = self.keyspace(keyspace)?;
        let mut rows = Vec::new();
        for shard in &ks.shards {
            rows.extend(shard.table(table)?.rows.iter().map(|r| r.values.clone()));
        }
        Ok(rows)
    }

    // =========================================================================
    // Routing
    // =========================================================================

    fn keyspace(&self, name: &str) -> Result<&Keyspace> {
        self.keyspaces.iter().find(|k| k.name == name).ok_or_else(|| {
            Error::remote(
                RpcCode::BadInput,
                Some(name.to_string()),
                None,
                format!("keyspace '{}' not found", name),
            )
        })
    }

    fn keyspace_mut(&mut self, name: &str) -> Result<&mut Keyspace> {
        self.keyspaces
            .iter_mut()
            .find(|k| k.name == name)
            .ok_or_else(|| Error::caller(format!("keyspace '{}' not found", name)))
    }

    /// Resolve a target to the shards it touches, in target order
    ///
    /// Shard targets keep duplicates; the other kinds merge every address
    /// of one shard into one scope.
    fn plan(&self, target: &Target) -> Result<(&Keyspace, ShardPlan)> {
        let ks = self.keyspace(target.keyspace())?;
        let mut plan: ShardPlan = Vec::new();
        let add = |plan: &mut ShardPlan, index: usize, scope: Scope| {
            match plan.iter_mut().find(|(i, _)| *i == index) {
                Some((_, existing)) => existing.merge(scope),
                None => plan.push((index, scope)),
            }
        };
        let owner = |id: &[u8]| {
            ks.shards.iter().position(|s| s.range.contains(id)).ok_or_else(|| {
                Error::remote(
                    RpcCode::BadInput,
                    Some(ks.name.clone()),
                    None,
                    "no shard owns keyspace id",
                )
            })
        };

        match target {
            Target::Shards { shards, .. } => {
                for name in shards {
                    let index = ks.shards.iter().position(|s| &s.name == name).ok_or_else(|| {
                        Error::shard(RpcCode::BadInput, ks.name.clone(), name.clone(), "unknown shard")
                    })?;
                    plan.push((index, Scope::Whole));
                }
            }
            Target::KeyspaceIds { ids, .. } => {
                for id in ids {
                    let index = owner(id.as_bytes())?;
                    let scope = Scope::Ids([id.as_bytes().to_vec()].into_iter().collect());
                    add(&mut plan, index, scope);
                }
            }
            Target::KeyRanges { ranges, .. } => {
                for range in ranges {
                    for (index, shard) in ks.shards.iter().enumerate() {
                        if shard.range.intersects(range) {
                            add(&mut plan, index, Scope::Ranges(vec![range.clone()]));
                        }
                    }
                }
            }
            Target::EntityIds {
                entity_column,
                mapping,
                ..
            } => {
                for (entity, ksid) in mapping {
                    let index = owner(ksid.as_bytes())?;
                    let pairs: BTreeSet<_> = [(entity.clone(), ksid.as_bytes().to_vec())].into_iter().collect();
                    add(
                        &mut plan,
                        index,
                        Scope::Entities {
                            column: entity_column.clone(),
                            pairs,
                        },
                    );
                }
            }
        }
        Ok((ks, plan))
    }

    fn check_faults(&self, keyspace: &str, shards: impl IntoIterator<Item = String>) -> Result<()> {
        for shard in shards {
            if let Some(code) = self.faults.get(&(keyspace.to_string(), shard.clone())) {
                return Err(Error::remote(
                    *code,
                    Some(keyspace.to_string()),
                    Some(shard),
                    "injected failure",
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one request, autocommitting unless `session` is transactional
    pub(crate) fn execute(&mut self, request: &ExecutionRequest, session: Option<&mut Session>) -> Result<QueryResult> {
        let statement = Statement::parse(request.query.sql())?;
        let role = request.query.role();
        if statement.is_write() && !role.is_writable() {
            return Err(Error::transport(
                RpcCode::BadInput,
                format!("cannot write through a {} tablet", role),
            ));
        }

        let (keyspace, shard_names, plan) = {
            let (ks, plan) = self.plan(&request.target)?;
            let names: Vec<String> = plan.iter().map(|(i, _)| ks.shards[*i].name.clone()).collect();
            (ks.name.clone(), names, plan)
        };
        self.check_faults(&keyspace, shard_names.iter().cloned())?;

        // Insert routing needs exactly one keyspace id.
        let insert_ksid = match (&statement, &request.target) {
            (Statement::Insert { .. }, Target::KeyspaceIds { ids, .. }) if ids.len() == 1 => {
                Some(ids[0].as_bytes().to_vec())
            }
            (Statement::Insert { .. }, Target::EntityIds { mapping, .. }) if mapping.len() == 1 => {
                mapping.values().next().map(|k| k.as_bytes().to_vec())
            }
            (Statement::Insert { .. }, _) => {
                return Err(Error::transport(
                    RpcCode::BadInput,
                    "insert must address exactly one keyspace id",
                ))
            }
            _ => None,
        };

        let txids: Vec<Option<i64>> = match session {
            Some(session) if session.in_transaction => shard_names
                .iter()
                .map(|shard| Some(self.shard_txid(session, &keyspace, shard, role)))
                .collect(),
            _ => vec![None; plan.len()],
        };

        let mut result = QueryResult::empty();
        for (((index, scope), txid), shard_name) in plan.into_iter().zip(txids).zip(&shard_names) {
            let part = self.execute_on_shard(&keyspace, index, scope, &statement, &request.query, insert_ksid.clone(), txid)?;
            debug!(
                target: "shardgate::memory",
                keyspace = %keyspace,
                shard = %shard_name,
                rows = part.rows.len(),
                "Shard executed"
            );
            result.append(part);
        }
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_on_shard(
        &mut self,
        keyspace: &str,
        index: usize,
        scope: Scope,
        statement: &Statement,
        query: &BoundQuery,
        insert_ksid: Option<Vec<u8>>,
        txid: Option<i64>,
    ) -> Result<QueryResult> {
        let staged: &[Write] = match txid.and_then(|t| self.transactions.get(&t)) {
            Some(staged) => &staged.writes,
            None => &[],
        };
        let shard = &self.keyspace(keyspace)?.shards[index];
        let table = shard.table(statement.table())?;

        let write = match statement {
            Statement::Select {
                projection,
                condition,
                ..
            } => {
                let condition = match condition {
                    Some(c) => Some((c.column.as_str(), c.operand.resolve(query.bind_vars())?)),
                    None => None,
                };
                let filter = RowFilter::bind(table, scope, condition)?;
                let rows = shard
                    .view(statement.table(), staged)?
                    .into_iter()
                    .filter(|r| filter.matches(r))
                    .collect();
                let columns = match projection {
                    Projection::All => None,
                    Projection::Columns(columns) => Some(columns.as_slice()),
                };
                return project(table, rows, columns);
            }
            Statement::Insert { columns, values, .. } => {
                // Only the owning shard stores the row.
                let ksid = insert_ksid.unwrap_or_default();
                if !shard.range.contains(&ksid) {
                    return Ok(QueryResult::empty());
                }
                let mut row = vec![Value::Null; table.columns.len()];
                for (column, operand) in columns.iter().zip(values) {
                    row[table.column(column)?] = operand.resolve(query.bind_vars())?;
                }
                Write::Insert {
                    table: statement.table().to_string(),
                    row: StoredRow { ksid, values: row },
                }
            }
            Statement::Delete { condition, .. } => {
                let condition = match condition {
                    Some(c) => Some((c.column.as_str(), c.operand.resolve(query.bind_vars())?)),
                    None => None,
                };
                Write::Delete {
                    table: statement.table().to_string(),
                    filter: RowFilter::bind(table, scope, condition)?,
                }
            }
        };

        let affected = match txid {
            Some(txid) => {
                // Count against the transaction's own view, then stage.
                let mut view = shard.view(statement.table(), staged)?;
                let affected = write.apply(&mut view);
                if let Some(staged) = self.transactions.get_mut(&txid) {
                    staged.writes.push(write);
                }
                affected
            }
            None => self.keyspace_mut(keyspace)?.shards[index].apply(&write)?,
        };
        Ok(QueryResult {
            rows_affected: affected,
            ..QueryResult::default()
        })
    }

    /// Transaction id of `shard` under `session`, opening one on first touch
    fn shard_txid(&mut self, session: &mut Session, keyspace: &str, shard: &str, role: TabletRole) -> i64 {
        if let Some(existing) = session.find(keyspace, shard, role) {
            if self.transactions.contains_key(&existing.transaction_id) {
                return existing.transaction_id;
            }
        }
        self.next_txid += 1;
        let txid = self.next_txid;
        self.transactions.insert(
            txid,
            Staged {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
                writes: Vec::new(),
            },
        );
        session.shard_sessions.retain(|s| !(s.keyspace == keyspace && s.shard == shard && s.role == role));
        session.shard_sessions.push(ShardSession {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            role,
            transaction_id: txid,
        });
        txid
    }

    /// Run one request inside `session`; shard transactions opened by a
    /// failed call are discarded again
    pub(crate) fn execute_in_session(&mut self, request: &ExecutionRequest, session: &mut Session) -> Result<QueryResult> {
        let known: Vec<i64> = session.shard_sessions.iter().map(|s| s.transaction_id).collect();
        let outcome = self.execute(request, Some(session));
        if outcome.is_err() {
            self.discard_new(session, &known);
        }
        outcome
    }

    fn discard_new(&mut self, session: &mut Session, known: &[i64]) {
        let transactions = &mut self.transactions;
        session.shard_sessions.retain(|s| {
            let keep = known.contains(&s.transaction_id);
            if !keep {
                transactions.remove(&s.transaction_id);
            }
            keep
        });
    }

    pub(crate) fn execute_batch(&mut self, request: &BatchRequest) -> Result<(Vec<QueryResult>, Option<Session>)> {
        if let Some(session) = &request.session {
            let mut session = session.clone();
            let known: Vec<i64> = session.shard_sessions.iter().map(|s| s.transaction_id).collect();
            let mut results = Vec::with_capacity(request.queries.len());
            for (index, element) in request.queries.iter().enumerate() {
                let single = ExecutionRequest::single(element.query.clone(), element.target.clone());
                match self.execute(&single, Some(&mut session)) {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        self.discard_new(&mut session, &known);
                        return Err(e.in_batch(index));
                    }
                }
            }
            return Ok((results, Some(session)));
        }

        if request.as_transaction {
            let mut session = Session::transactional();
            let mut results = Vec::with_capacity(request.queries.len());
            for (index, element) in request.queries.iter().enumerate() {
                let single = ExecutionRequest::single(element.query.clone(), element.target.clone());
                match self.execute(&single, Some(&mut session)) {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        self.abandon(&session);
                        return Err(e.in_batch(index));
                    }
                }
            }
            self.commit(&session)?;
            return Ok((results, None));
        }

        let mut results = Vec::with_capacity(request.queries.len());
        for (index, element) in request.queries.iter().enumerate() {
            let single = ExecutionRequest::single(element.query.clone(), element.target.clone());
            results.push(self.execute(&single, None).map_err(|e| e.in_batch(index))?);
        }
        Ok((results, None))
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Apply every shard transaction of `session`, or none of them
    pub(crate) fn commit(&mut self, session: &Session) -> Result<()> {
        for s in &session.shard_sessions {
            if !self.transactions.contains_key(&s.transaction_id) {
                return Err(Error::remote(
                    RpcCode::NotInTx,
                    Some(s.keyspace.clone()),
                    Some(s.shard.clone()),
                    format!("transaction {} not found on {}/{}", s.transaction_id, s.keyspace, s.shard),
                ));
            }
        }
        for s in &session.shard_sessions {
            if let Err(e) = self.check_faults(&s.keyspace, [s.shard.clone()]) {
                self.discard(session);
                return Err(e);
            }
        }

        for s in &session.shard_sessions {
            if let Some(staged) = self.transactions.remove(&s.transaction_id) {
                let ks = self.keyspace_mut(&staged.keyspace)?;
                if let Some(shard) = ks.shards.iter_mut().find(|sh| sh.name == staged.shard) {
                    for write in &staged.writes {
                        shard.apply(write)?;
                    }
                }
            }
        }
        self.commits += 1;
        Ok(())
    }

    /// Discard every shard transaction of `session`
    ///
    /// Unknown transaction ids are ignored. An injected failure on a
    /// touched shard is reported after the work has been discarded.
    pub(crate) fn rollback(&mut self, session: &Session) -> Result<()> {
        self.discard(session);
        self.rollbacks += 1;
        for s in &session.shard_sessions {
            self.check_faults(&s.keyspace, [s.shard.clone()])?;
        }
        Ok(())
    }

    /// Roll back without consulting shard faults; the caller already has
    /// the error it will report
    fn abandon(&mut self, session: &Session) {
        self.discard(session);
        self.rollbacks += 1;
    }

    fn discard(&mut self, session: &Session) {
        for s in &session.shard_sessions {
            self.transactions.remove(&s.transaction_id);
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Split a select into key-range parts of roughly equal row counts
    ///
    /// Boundaries are taken at evenly spaced positions of the sorted
    /// keyspace ids of the table's committed rows.
    pub(crate) fn split_query(&self, request: &SplitQueryRequest) -> Result<Vec<SplitPart>> {
        let statement = Statement::parse(request.query.sql())?;
        if statement.is_write() {
            return Err(Error::transport(RpcCode::BadInput, "only select statements can be split"));
        }
        let ks = self.keyspace(&request.keyspace)?;

        let mut ksids = Vec::new();
        for shard in &ks.shards {
            let table = shard.table(statement.table())?;
            if !request.split_column.is_empty() {
                table.column(&request.split_column)?;
            }
            ksids.extend(table.rows.iter().map(|r| r.ksid.clone()));
        }
        ksids.sort();

        let count = request.split_count as usize;
        let mut bounds: Vec<Vec<u8>> = Vec::new();
        for k in 1..count {
            if let Some(bound) = ksids.get(k * ksids.len() / count) {
                if bounds.last() != Some(bound) && !bound.is_empty() {
                    bounds.push(bound.clone());
                }
            }
        }

        let mut starts = vec![Vec::new()];
        starts.extend(bounds.iter().cloned());
        let mut ends = bounds;
        ends.push(Vec::new());

        Ok(starts
            .into_iter()
            .zip(ends)
            .map(|(start, end)| {
                let range = KeyRange::new(start, end);
                let size = ksids.iter().filter(|id| range.contains(id)).count() as u64;
                SplitPart {
                    query: request.query.clone(),
                    keyspace: ks.name.clone(),
                    key_ranges: vec![range],
                    size,
                }
            })
            .collect())
    }

    pub(crate) fn srv_keyspace(&self, name: &str) -> Result<SrvKeyspace> {
        let ks = self.keyspace(name)?;
        let shards: Vec<ShardReference> = ks
            .shards
            .iter()
            .map(|s| ShardReference {
                name: s.name.clone(),
                key_range: s.range.clone(),
            })
            .collect();
        Ok(SrvKeyspace {
            name: ks.name.clone(),
            sharding_column: ks.sharding_column.clone(),
            partitions: TabletRole::ALL
                .iter()
                .map(|role| KeyspacePartition {
                    role: *role,
                    shards: shards.clone(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_core::{ErrorKind, KeyspaceId};
    use std::collections::BTreeMap;

    fn store() -> Store {
        let shards = ["-80", "80-"]
            .iter()
            .map(|name| {
                let mut tables = BTreeMap::new();
                tables.insert(
                    "users".to_string(),
                    super::super::shard::Table::new(vec!["id".into(), "name".into()]),
                );
                Shard {
                    name: name.to_string(),
                    range: KeyRange::from_shard_name(name).unwrap(),
                    tables,
                }
            })
            .collect();
        Store::new(vec![Keyspace {
            name: "ks".into(),
            sharding_column: Some("id".into()),
            shards,
        }])
    }

    fn insert(id: i64, ksid: u8) -> ExecutionRequest {
        ExecutionRequest::single(
            BoundQuery::new("insert into users (id, name) values (:id, 'x')").bind("id", id),
            Target::keyspace_ids("ks", [KeyspaceId::from([ksid])]),
        )
    }

    fn select_all() -> ExecutionRequest {
        ExecutionRequest::single(
            BoundQuery::new("select * from users"),
            Target::shards("ks", ["-80", "80-"]),
        )
    }

    #[test]
    fn test_insert_lands_on_owning_shard() {
        let mut store = store();
        store.execute(&insert(1, 0x10), None).unwrap();
        store.execute(&insert(2, 0xa0), None).unwrap();

        let low = ExecutionRequest::single(BoundQuery::new("select id from users"), Target::shards("ks", ["-80"]));
        let result = store.execute(&low, None).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(1)]]);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 2);
    }

    #[test]
    fn test_staged_writes_visible_only_in_session() {
        let mut store = store();
        let mut session = Session::transactional();
        store.execute_in_session(&insert(1, 0x10), &mut session).unwrap();

        assert_eq!(session.shard_count(), 1);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 0);
        assert_eq!(store.execute(&select_all(), Some(&mut session)).unwrap().len(), 1);

        store.commit(&session).unwrap();
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 1);
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn test_rollback_discards_staged_writes() {
        let mut store = store();
        let mut session = Session::transactional();
        store.execute_in_session(&insert(1, 0x10), &mut session).unwrap();
        store.rollback(&session).unwrap();
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 0);
        assert_eq!(store.rollbacks, 1);
    }

    #[test]
    fn test_commit_fault_applies_nothing() {
        let mut store = store();
        let mut session = Session::transactional();
        store.execute_in_session(&insert(1, 0x10), &mut session).unwrap();
        store.execute_in_session(&insert(2, 0xa0), &mut session).unwrap();
        store.set_fault("ks", "80-", Some(RpcCode::TransientError));

        let err = store.commit(&session).unwrap_err();
        assert_eq!(err.rpc_code(), Some(RpcCode::TransientError));
        store.set_fault("ks", "80-", None);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 0);
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn test_commit_unknown_transaction_is_transaction_error() {
        let mut store = store();
        let mut session = Session::transactional();
        session.shard_sessions.push(ShardSession {
            keyspace: "ks".into(),
            shard: "-80".into(),
            role: TabletRole::Primary,
            transaction_id: 42,
        });
        assert_eq!(store.commit(&session).unwrap_err().kind(), ErrorKind::Transaction);
    }

    #[test]
    fn test_write_to_replica_rejected() {
        let mut store = store();
        let mut request = insert(1, 0x10);
        request.query = request.query.with_role(TabletRole::Replica);
        assert_eq!(store.execute(&request, None).unwrap_err().rpc_code(), Some(RpcCode::BadInput));
    }

    #[test]
    fn test_insert_needs_one_keyspace_id() {
        let mut store = store();
        let request = ExecutionRequest::single(
            BoundQuery::new("insert into users (id) values (1)"),
            Target::shards("ks", ["-80"]),
        );
        assert!(store.execute(&request, None).is_err());
    }

    #[test]
    fn test_fault_on_any_shard_fails_before_writing() {
        let mut store = store();
        store.execute(&insert(1, 0x10), None).unwrap();
        store.set_fault("ks", "80-", Some(RpcCode::QueryNotServed));
        let delete = ExecutionRequest::single(BoundQuery::new("delete from users"), Target::shards("ks", ["-80", "80-"]));
        let err = store.execute(&delete, None).unwrap_err();
        assert_eq!(err.rpc_code(), Some(RpcCode::QueryNotServed));
        store.set_fault("ks", "80-", None);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 1);
    }

    #[test]
    fn test_atomic_batch_failure_keeps_element_error() {
        let mut store = store();
        let two_ids = ExecutionRequest::single(
            BoundQuery::new("insert into users (id, name) values (2, 'y')"),
            Target::keyspace_ids("ks", [KeyspaceId::from([0x10]), KeyspaceId::from([0x20])]),
        );
        let request = BatchRequest {
            queries: [insert(1, 0x10), two_ids]
                .into_iter()
                .map(|r| crate::BatchQuery::new(r.query, r.target))
                .collect(),
            as_transaction: true,
            session: None,
        };

        let err = store.execute_batch(&request).unwrap_err();
        assert_eq!(err.rpc_code(), Some(RpcCode::BadInput));
        assert!(err.to_string().contains("batch element 1"), "{}", err);
        assert_eq!(store.open_transactions(), 0);
        assert_eq!(store.rollbacks, 1);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 0);
    }

    #[test]
    fn test_abandon_ignores_shard_faults() {
        let mut store = store();
        let mut session = Session::transactional();
        store.execute_in_session(&insert(1, 0x10), &mut session).unwrap();
        store.set_fault("ks", "-80", Some(RpcCode::TransientError));

        store.abandon(&session);
        assert_eq!(store.open_transactions(), 0);
        assert_eq!(store.rollbacks, 1);

        store.set_fault("ks", "-80", None);
        assert_eq!(store.execute(&select_all(), None).unwrap().len(), 0);
    }

    #[test]
    fn test_split_parts_cover_all_rows() {
        let mut store = store();
        for (id, ksid) in [(1, 0x10), (2, 0x30), (3, 0x90), (4, 0xc0)] {
            store.execute(&insert(id, ksid), None).unwrap();
        }
        let parts = store
            .split_query(&SplitQueryRequest {
                keyspace: "ks".into(),
                query: BoundQuery::new("select * from users"),
                split_column: "id".into(),
                split_count: 2,
            })
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), 4);
        assert!(parts[0].key_ranges[0].start.is_empty());
        assert!(parts[1].key_ranges[0].end.is_empty());
    }

    #[test]
    fn test_srv_keyspace_lists_every_role() {
        let srv = store().srv_keyspace("ks").unwrap();
        assert_eq!(srv.partitions.len(), TabletRole::ALL.len());
        assert_eq!(srv.partitions[0].shards.len(), 2);
        assert!(store().srv_keyspace("nope").is_err());
    }
}
