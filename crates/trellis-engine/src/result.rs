//! Query results and their cursor.
//!
//! A [`QueryResult`] is either materialized (write queries, EXPLAIN, anything
//! run inside an explicit transaction) or lazy: an operator tree pulled one
//! row per [`get_next`](QueryResult::get_next) while a snapshot pin keeps the
//! versions it reads alive. Dropping the result releases both.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use trellis_common::memory::Reservation;
use trellis_common::types::{LogicalType, Value};
use trellis_common::utils::error::Error;
use trellis_core::execution::{BoxedOperator, OperatorError};

use crate::database::HandleState;
use crate::failure::{Failure, Stage};
use crate::transaction::SnapshotPin;

/// Where the cursor stands. `Exhausted` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Ready,
    Exhausted,
    Failed,
}

/// One result row; one value per result column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<[String]>,
}

impl Row {
    /// # Errors
    ///
    /// `IndexOutOfRange` when `index` is not below the column count.
    pub fn get_value(&self, index: usize) -> Result<&Value, Failure> {
        self.values.get(index).ok_or_else(|| {
            Failure::new(
                Stage::Fetch,
                Error::IndexOutOfRange {
                    index,
                    len: self.values.len(),
                },
            )
        })
    }

    /// The value of the named column.
    #[must_use]
    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) enum Source {
    /// Rows computed up front. The reservation covers their memory.
    Materialized {
        rows: std::vec::IntoIter<Vec<Value>>,
        _reservation: Option<Reservation>,
    },
    Lazy {
        root: BoxedOperator,
        _pin: SnapshotPin,
    },
}

impl Source {
    fn pull(&mut self) -> Result<Option<Vec<Value>>, OperatorError> {
        match self {
            Self::Materialized { rows, .. } => Ok(rows.next()),
            Self::Lazy { root, .. } => root.next(),
        }
    }
}

/// The outcome of a successful execute: column metadata plus a row cursor.
pub struct QueryResult {
    columns: Arc<[String]>,
    column_types: Vec<LogicalType>,
    source: Source,
    state: CursorState,
    /// A row (or failure) pulled by `has_next` but not yet returned.
    lookahead: Option<Result<Row, Failure>>,
    /// What went wrong when the cursor moved to `Failed`.
    failure: Option<String>,
    handle: Weak<HandleState>,
    compile_time: Duration,
    execution_time: Duration,
}

impl QueryResult {
    pub(crate) fn new(
        columns: Vec<String>,
        column_types: Vec<LogicalType>,
        source: Source,
        handle: Weak<HandleState>,
        compile_time: Duration,
        execution_time: Duration,
    ) -> Self {
        Self {
            columns: columns.into(),
            column_types,
            source,
            state: CursorState::Ready,
            lookahead: None,
            failure: None,
            handle,
            compile_time,
            execution_time,
        }
    }

    fn handle_open(&self) -> bool {
        self.handle.upgrade().is_some_and(|h| h.is_open())
    }

    /// Pulls the next row from the source.
    ///
    /// A row that fails to compute is a `Fetch` failure carrying the
    /// operator's message. A timeout stays an `Execution` failure.
    fn advance(&mut self) -> Option<Result<Row, Failure>> {
        let started = Instant::now();
        let pulled = self.source.pull();
        self.execution_time += started.elapsed();
        match pulled {
            Ok(Some(mut values)) => {
                values.truncate(self.columns.len());
                Some(Ok(Row {
                    values,
                    columns: Arc::clone(&self.columns),
                }))
            }
            Ok(None) => {
                self.state = CursorState::Exhausted;
                None
            }
            Err(e @ OperatorError::Timeout(_)) => Some(Err(Failure::new(Stage::Fetch, Error::from(e)))),
            Err(e) => Some(Err(Failure::new(Stage::Fetch, Error::Fetch(e.to_string())))),
        }
    }

    /// Whether [`get_next`](Self::get_next) would return something other than
    /// `CursorExhausted`. Never fails and is idempotent. A failing row counts
    /// as "next": the failure is delivered by the following `get_next`.
    pub fn has_next(&mut self) -> bool {
        if !self.handle_open() {
            return false;
        }
        if self.lookahead.is_some() {
            return true;
        }
        if self.state != CursorState::Ready {
            return false;
        }
        self.lookahead = self.advance();
        self.lookahead.is_some()
    }

    /// Returns the next row and advances by one.
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` once the database is closed
    /// - `Fetch` the first time a row fails (overflow, division by zero,
    ///   storage errors), after which the cursor is `Failed`
    /// - `Execution` instead when the first failure is the query timeout
    /// - `Fetch` with the first failure's message on every later call
    /// - `CursorExhausted` after the last row
    pub fn get_next(&mut self) -> Result<Row, Failure> {
        if !self.handle_open() {
            return Err(Failure::new(
                Stage::Fetch,
                Error::InvalidHandle("database handle is closed".into()),
            ));
        }
        let next = match self.lookahead.take() {
            Some(next) => Some(next),
            None => match self.state {
                CursorState::Ready => self.advance(),
                CursorState::Exhausted => None,
                CursorState::Failed => {
                    let message = self.failure.clone().unwrap_or_default();
                    return Err(Failure::new(Stage::Fetch, Error::Fetch(message)));
                }
            },
        };
        match next {
            Some(Ok(row)) => Ok(row),
            Some(Err(failure)) => {
                tracing::debug!(kind = %failure.kind(), "cursor failed: {failure}");
                self.state = CursorState::Failed;
                self.failure = Some(match failure.error() {
                    Error::Fetch(message) => message.clone(),
                    other => other.to_string(),
                });
                Err(failure)
            }
            None => Err(Failure::new(Stage::Fetch, Error::CursorExhausted)),
        }
    }

    /// Result column names in projection order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Column types inferred at compile time; `ANY` where unknown.
    #[must_use]
    pub fn column_types(&self) -> &[LogicalType] {
        &self.column_types
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Time spent parsing, binding and planning. Zero on a cache hit.
    #[must_use]
    pub fn compile_time(&self) -> Duration {
        self.compile_time
    }

    /// Time spent producing rows so far.
    #[must_use]
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Drains the cursor into one vector of rendered values per column.
    ///
    /// # Errors
    ///
    /// The first failure from [`get_next`](Self::get_next).
    pub fn collect_string_columns(&mut self) -> Result<IndexMap<String, Vec<String>>, Failure> {
        let mut out: IndexMap<String, Vec<String>> =
            self.columns.iter().map(|c| (c.clone(), Vec::new())).collect();
        while self.has_next() {
            let row = self.get_next()?;
            for (values, value) in out.values_mut().zip(row.values()) {
                values.push(value.to_string());
            }
        }
        Ok(out)
    }
}

impl Iterator for QueryResult {
    type Item = Result<Row, Failure>;

    /// Yields rows until exhaustion; a failure is yielded once and ends
    /// iteration.
    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.get_next())
        } else {
            None
        }
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .field("column_types", &self.column_types)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
