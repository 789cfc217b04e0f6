//! Sessions: where queries run.
//!
//! A session holds nothing but a weak reference to its database handle and,
//! inside `BEGIN ... COMMIT`, the id of its open transaction. Outside an
//! explicit transaction every statement commits on its own: writes run to
//! completion under the writer slot before `execute` returns, reads stream
//! lazily from a pinned snapshot.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use trellis_adapters::query::cypher::ast::Statement;
use trellis_adapters::query::cypher::parse;
use trellis_common::memory::{BufferPool, Reservation};
use trellis_common::types::{LogicalType, TxId, Value};
use trellis_common::utils::error::{Error, QueryError, QueryErrorKind, Result, TransactionError};
use trellis_common::utils::strings::suggestion_hint;
use trellis_core::execution::{BoxedOperator, ExecutionContext};
use trellis_core::{Catalog, Mutation, TableSchema, TxView};

use crate::database::{HandleState, Shared};
use crate::failure::{AtStage, Failure, Stage};
use crate::query::{LogicalPlan, Params, bind_node_table, bind_rel_table, compile};
use crate::result::{QueryResult, Source};
use crate::transaction::TxState;

const READ_ONLY: &str = "Cannot execute a write query on a read-only database";

/// A connection to a [`Database`](crate::Database).
///
/// Sessions are cheap; open one per thread. Dropping a session rolls back its
/// open transaction, if any.
pub struct Session {
    handle: Weak<HandleState>,
    tx: Option<TxId>,
}

impl Session {
    pub(crate) fn new(handle: Weak<HandleState>) -> Self {
        Self { handle, tx: None }
    }

    fn state(&self) -> Result<Arc<HandleState>> {
        self.handle
            .upgrade()
            .ok_or_else(|| Error::InvalidHandle("database handle is closed".into()))
    }

    /// Runs one statement.
    ///
    /// # Errors
    ///
    /// `Syntax` or `Binding` at the compile stage, `Execution` or
    /// `WriteConflict` at the execute stage, `InvalidHandle` once the
    /// database is closed. A failure inside an explicit transaction rolls
    /// the transaction back.
    pub fn execute(&mut self, query: &str) -> std::result::Result<QueryResult, Failure> {
        self.execute_with_params(query, &Params::new())
    }

    /// Runs one statement with `$name` parameters.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute). A parameter the query references but
    /// `params` lacks is a binding error.
    pub fn execute_with_params(&mut self, query: &str, params: &Params) -> std::result::Result<QueryResult, Failure> {
        let state = self.state().at(Stage::Execute)?;
        let shared = match state.shared() {
            Ok(shared) => shared,
            Err(e) => {
                // Closing the handle already rolled our transaction back.
                self.tx = None;
                return Err(Failure::new(Stage::Execute, e));
            }
        };
        let result = self.run(&state, &shared, query, params);
        if result.is_err()
            && let Some(tx) = self.tx.take()
        {
            tracing::debug!(tx = %tx, "statement failed, aborting transaction");
            state.untrack_tx(tx);
            shared.rollback(tx);
        }
        result
    }

    fn run(
        &mut self,
        state: &Arc<HandleState>,
        shared: &Arc<Shared>,
        query: &str,
        params: &Params,
    ) -> std::result::Result<QueryResult, Failure> {
        let started = Instant::now();
        let cacheable = params.is_empty();
        if cacheable && let Some(plan) = shared.cache.get(query) {
            tracing::debug!("plan cache hit");
            return self.run_plan(state, shared, &plan, Duration::ZERO);
        }

        match parse(query).at(Stage::Compile)? {
            Statement::Query(q) => {
                let plan = Arc::new(compile(&shared.store, &q, params).at(Stage::Compile)?);
                if cacheable {
                    shared.cache.put(query, Arc::clone(&plan));
                }
                self.run_plan(state, shared, &plan, started.elapsed())
            }
            Statement::Explain(inner) => {
                let Statement::Query(q) = *inner else {
                    return Err(Error::binding("EXPLAIN expects a query")).at(Stage::Compile);
                };
                let plan = compile(&shared.store, &q, params).at(Stage::Compile)?;
                let rows = plan.explain().into_iter().map(|line| vec![Value::from(line)]).collect();
                Ok(self.materialized("plan", rows, started.elapsed()))
            }
            Statement::Begin => {
                self.begin(state, shared).at(Stage::Execute)?;
                Ok(self.empty(started.elapsed()))
            }
            Statement::Commit => {
                self.finish(state, shared, TxState::Committed).at(Stage::Execute)?;
                Ok(self.empty(started.elapsed()))
            }
            Statement::Rollback => {
                self.finish(state, shared, TxState::Aborted).at(Stage::Execute)?;
                Ok(self.empty(started.elapsed()))
            }
            Statement::Checkpoint => {
                if self.tx.is_some() {
                    return Err(Error::execution("CHECKPOINT is not allowed inside an explicit transaction"))
                        .at(Stage::Execute);
                }
                if state.read_only() {
                    return Err(Error::execution("Cannot checkpoint a read-only database")).at(Stage::Execute);
                }
                shared.checkpoint().at(Stage::Execute)?;
                Ok(self.empty(started.elapsed()))
            }
            ddl => {
                let message = self.run_ddl(state, shared, &ddl)?;
                Ok(self.materialized("result", vec![vec![Value::from(message)]], started.elapsed()))
            }
        }
    }

    /// Validates a DDL statement against the current catalog, then applies it
    /// as its own committed transaction.
    fn run_ddl(
        &self,
        state: &HandleState,
        shared: &Shared,
        statement: &Statement,
    ) -> std::result::Result<String, Failure> {
        if self.tx.is_some() {
            return Err(Error::execution("DDL is not allowed inside an explicit transaction")).at(Stage::Execute);
        }
        if state.read_only() {
            return Err(Error::execution(READ_ONLY)).at(Stage::Execute);
        }
        let catalog = shared.store.catalog();
        let message = match statement {
            Statement::CreateNodeTable(stmt) => {
                let schema = bind_node_table(stmt).at(Stage::Compile)?;
                shared.apply_ddl(|catalog| created(catalog, schema)).at(Stage::Execute)?;
                format!("Node table {} has been created.", stmt.name)
            }
            Statement::CreateRelTable(stmt) => {
                let schema = bind_rel_table(&catalog, stmt).at(Stage::Compile)?;
                shared.apply_ddl(|catalog| created(catalog, schema)).at(Stage::Execute)?;
                format!("Rel table {} has been created.", stmt.name)
            }
            Statement::DropTable { name, span } => {
                let Some(table) = catalog.table_by_name(name) else {
                    let names: Vec<&str> = catalog.tables().map(|t| t.name.as_str()).collect();
                    let mut err = QueryError::new(QueryErrorKind::Binding, format!("Table {name} does not exist"))
                        .with_span(*span);
                    if let Some(hint) = suggestion_hint(name, &names) {
                        err = err.with_hint(hint);
                    }
                    return Err(Error::Query(err)).at(Stage::Compile);
                };
                let id = table.id;
                shared
                    .apply_ddl(|catalog| {
                        catalog.without_table(id)?;
                        Ok(Mutation::DropTable { table: id })
                    })
                    .at(Stage::Execute)?;
                format!("Table {name} has been dropped.")
            }
            _ => return Err(Error::Internal("not a DDL statement".into())).at(Stage::Execute),
        };
        Ok(message)
    }

    fn run_plan(
        &mut self,
        state: &Arc<HandleState>,
        shared: &Arc<Shared>,
        plan: &Arc<LogicalPlan>,
        compile_time: Duration,
    ) -> std::result::Result<QueryResult, Failure> {
        if plan.is_write && state.read_only() {
            return Err(Error::execution(READ_ONLY)).at(Stage::Execute);
        }
        let started = Instant::now();
        let context = |view: TxView| {
            Arc::new(
                ExecutionContext::new(Arc::clone(&shared.store), view, Arc::clone(&shared.pool))
                    .with_timeout(state.query_timeout()),
            )
        };
        let width = plan.columns.len();

        let source = match self.tx {
            // Inside an explicit transaction everything runs eagerly, so a
            // failure aborts the transaction before `execute` returns.
            Some(tx) => {
                if plan.is_write {
                    shared.tm.acquire_writer(tx).at(Stage::Execute)?;
                }
                let view = shared.tm.view(tx).at(Stage::Execute)?;
                let mut root = plan.build(&context(view));
                materialize(&mut root, &shared.pool, width).at(Stage::Execute)?
            }
            None if plan.is_write => {
                let tx = shared.tm.begin();
                let ran = shared.tm.acquire_writer(tx).and_then(|()| {
                    let view = shared.tm.view(tx)?;
                    let mut root = plan.build(&context(view));
                    materialize(&mut root, &shared.pool, width)
                });
                match ran {
                    Ok(source) => {
                        shared.commit(tx).at(Stage::Execute)?;
                        source
                    }
                    Err(e) => {
                        shared.rollback(tx);
                        return Err(Failure::new(Stage::Execute, e));
                    }
                }
            }
            None => {
                let pin = shared.tm.pin_current();
                let root = plan.build(&context(TxView::read_only(pin.epoch())));
                Source::Lazy { root, _pin: pin }
            }
        };
        Ok(QueryResult::new(
            plan.columns.clone(),
            plan.column_types.clone(),
            source,
            Arc::downgrade(state),
            compile_time,
            started.elapsed(),
        ))
    }

    fn begin(&mut self, state: &HandleState, shared: &Shared) -> Result<()> {
        if let Some(tx) = self.tx {
            return Err(Error::Transaction(TransactionError::InvalidState(format!(
                "transaction {tx} is already active"
            ))));
        }
        let tx = shared.tm.begin();
        state.track_tx(tx);
        self.tx = Some(tx);
        tracing::debug!(tx = %tx, "explicit transaction started");
        Ok(())
    }

    fn finish(&mut self, state: &HandleState, shared: &Shared, outcome: TxState) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            Error::Transaction(TransactionError::InvalidState("no active transaction".into()))
        })?;
        state.untrack_tx(tx);
        match outcome {
            TxState::Committed => shared.commit(tx),
            _ => {
                shared.rollback(tx);
                Ok(())
            }
        }
    }

    /// Starts an explicit transaction; same as `BEGIN TRANSACTION`.
    ///
    /// # Errors
    ///
    /// A transaction is already open, or the handle is closed.
    pub fn begin_tx(&mut self) -> std::result::Result<(), Failure> {
        let state = self.state().at(Stage::Execute)?;
        let shared = state.shared().at(Stage::Execute)?;
        self.begin(&state, &shared).at(Stage::Execute)
    }

    /// Commits the open transaction; same as `COMMIT`.
    ///
    /// # Errors
    ///
    /// No transaction is open, the WAL append failed (the transaction is
    /// rolled back), or the handle is closed.
    pub fn commit(&mut self) -> std::result::Result<(), Failure> {
        let state = self.state().at(Stage::Execute)?;
        let shared = state.shared().at(Stage::Execute)?;
        self.finish(&state, &shared, TxState::Committed).at(Stage::Execute)
    }

    /// Rolls back the open transaction; same as `ROLLBACK`.
    ///
    /// # Errors
    ///
    /// No transaction is open, or the handle is closed.
    pub fn rollback(&mut self) -> std::result::Result<(), Failure> {
        let state = self.state().at(Stage::Execute)?;
        let shared = state.shared().at(Stage::Execute)?;
        self.finish(&state, &shared, TxState::Aborted).at(Stage::Execute)
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn empty(&self, compile_time: Duration) -> QueryResult {
        QueryResult::new(
            Vec::new(),
            Vec::new(),
            Source::Materialized {
                rows: Vec::new().into_iter(),
                _reservation: None,
            },
            self.handle.clone(),
            compile_time,
            Duration::ZERO,
        )
    }

    fn materialized(&self, column: &str, rows: Vec<Vec<Value>>, compile_time: Duration) -> QueryResult {
        QueryResult::new(
            vec![column.to_string()],
            vec![LogicalType::String],
            Source::Materialized {
                rows: rows.into_iter(),
                _reservation: None,
            },
            self.handle.clone(),
            compile_time,
            Duration::ZERO,
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(state) = self.handle.upgrade() else {
            return;
        };
        state.session_closed();
        if let Some(tx) = self.tx.take() {
            state.untrack_tx(tx);
            if let Ok(shared) = state.shared() {
                tracing::debug!(tx = %tx, "session dropped with open transaction");
                shared.rollback(tx);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("tx", &self.tx).finish()
    }
}

/// The mutation that adds `schema`, with the id the catalog will assign.
fn created(catalog: &Catalog, schema: TableSchema) -> Result<Mutation> {
    let (next, id) = catalog.with_table(schema)?;
    next.table(id)
        .map(|t| Mutation::CreateTable((**t).clone()))
        .ok_or_else(|| Error::Internal(format!("table {id} vanished after creation")))
}

/// Drains an operator tree, charging the kept rows to the buffer pool.
/// Statements without result columns keep nothing.
fn materialize(root: &mut BoxedOperator, pool: &Arc<BufferPool>, width: usize) -> Result<Source> {
    let mut reservation: Reservation = pool.reservation();
    let mut rows = Vec::new();
    while let Some(mut row) = root.next()? {
        if width == 0 {
            continue;
        }
        row.truncate(width);
        reservation.grow(row.iter().map(Value::estimated_size).sum())?;
        rows.push(row);
    }
    Ok(Source::Materialized {
        rows: rows.into_iter(),
        _reservation: Some(reservation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorKind;
    use crate::{Config, Database};

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut session = db.connect().unwrap();
        session
            .execute("CREATE NODE TABLE Person(name STRING, age INT64, PRIMARY KEY(name))")
            .unwrap();
        db
    }

    #[test]
    fn test_return_literal() {
        let db = Database::open_in_memory().unwrap();
        let mut session = db.connect().unwrap();
        let mut result = session.execute("RETURN 1").unwrap();
        assert_eq!(result.column_count(), 1);
        let row = result.get_next().unwrap();
        assert_eq!(row.get_value(0).unwrap(), &Value::Int64(1));
        assert!(!result.has_next());
    }

    #[test]
    fn test_ddl_result_message() {
        let db = Database::open_in_memory().unwrap();
        let mut session = db.connect().unwrap();
        let mut result = session
            .execute("CREATE NODE TABLE City(name STRING, PRIMARY KEY(name))")
            .unwrap();
        assert_eq!(result.column_names(), ["result"]);
        assert_eq!(
            result.get_next().unwrap().get_value(0).unwrap().to_string(),
            "Node table City has been created."
        );
        let err = session
            .execute("CREATE NODE TABLE City(name STRING, PRIMARY KEY(name))")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_drop_unknown_table_hints() {
        let db = setup();
        let mut session = db.connect().unwrap();
        let err = session.execute("DROP TABLE Persn").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(err.stage(), Stage::Compile);
        assert!(err.message().contains("Person"), "{}", err.message());
        session.execute("DROP TABLE Person").unwrap();
    }

    #[test]
    fn test_write_without_return_has_no_rows() {
        let db = setup();
        let mut session = db.connect().unwrap();
        let mut result = session.execute("CREATE (:Person {name: 'Ann', age: 30})").unwrap();
        assert_eq!(result.column_count(), 0);
        assert!(!result.has_next());
        let mut result = session.execute("MATCH (p:Person) RETURN p.name").unwrap();
        assert_eq!(result.get_next().unwrap().get_value(0).unwrap(), &Value::from("Ann"));
    }

    #[test]
    fn test_params() {
        let db = setup();
        let mut session = db.connect().unwrap();
        let mut params = Params::new();
        params.insert("name".into(), Value::from("Bob"));
        params.insert("age".into(), Value::Int64(41));
        session
            .execute_with_params("CREATE (:Person {name: $name, age: $age})", &params)
            .unwrap();
        let mut result = session
            .execute_with_params("MATCH (p:Person) WHERE p.name = $name RETURN p.age", &params)
            .unwrap();
        assert_eq!(result.get_next().unwrap().get_value(0).unwrap(), &Value::Int64(41));

        let err = session.execute("RETURN $missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn test_explicit_transaction_statements() {
        let db = setup();
        let mut session = db.connect().unwrap();
        session.execute("BEGIN TRANSACTION").unwrap();
        assert!(session.in_transaction());
        session.execute("CREATE (:Person {name: 'Ann', age: 30})").unwrap();
        session.execute("ROLLBACK").unwrap();
        assert!(!session.in_transaction());
        let mut result = session.execute("MATCH (p:Person) RETURN count(p)").unwrap();
        assert_eq!(result.get_next().unwrap().get_value(0).unwrap(), &Value::Int64(0));

        let err = session.execute("COMMIT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_ddl_rejected_inside_transaction() {
        let db = setup();
        let mut session = db.connect().unwrap();
        session.begin_tx().unwrap();
        let err = session
            .execute("CREATE NODE TABLE City(name STRING, PRIMARY KEY(name))")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        // The failure aborted the transaction.
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_read_only_rejects_writes_at_execute() {
        let db = Database::open(":memory:", Config::default().with_read_only(true)).unwrap();
        let mut session = db.connect().unwrap();
        let err = session
            .execute("CREATE NODE TABLE City(name STRING, PRIMARY KEY(name))")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.stage(), Stage::Execute);
        session.execute("RETURN 1").unwrap();
    }

    #[test]
    fn test_explain() {
        let db = setup();
        let mut session = db.connect().unwrap();
        let mut result = session.execute("EXPLAIN MATCH (p:Person) RETURN p.name").unwrap();
        assert_eq!(result.column_names(), ["plan"]);
        let lines = result.collect_string_columns().unwrap().swap_remove("plan").unwrap();
        assert!(lines.iter().any(|l| l.contains("NodeScan")), "{lines:?}");
    }

    #[test]
    fn test_cache_hit_reuses_plan() {
        let db = setup();
        let mut session = db.connect().unwrap();
        session.execute("MATCH (p:Person) RETURN p.name").unwrap();
        let result = session.execute("MATCH (p:Person) RETURN p.name").unwrap();
        assert_eq!(result.compile_time(), Duration::ZERO);
    }

    #[test]
    fn test_session_drop_rolls_back() {
        let db = setup();
        {
            let mut session = db.connect().unwrap();
            session.begin_tx().unwrap();
            session.execute("CREATE (:Person {name: 'Ann', age: 30})").unwrap();
        }
        assert_eq!(db.stats().unwrap().active_transactions, 0);
        let mut session = db.connect().unwrap();
        session.execute("CREATE (:Person {name: 'Bob', age: 1})").unwrap();
        assert_eq!(db.stats().unwrap().node_count, 1);
    }
}
