//! Physical operators.
//!
//! Every operator pulls rows from its input on demand. Blocking operators
//! (aggregate, sort, distinct bookkeeping and the mutation operators) charge
//! what they buffer to the query's [`BufferPool`](trellis_common::memory::BufferPool).
//!
//! **Graph operators:**
//! - [`NodeScanOperator`] - every node of some tables, per input row
//! - [`NodeLookupOperator`] - primary-key point lookup
//! - [`ExpandOperator`] - follow relationships from a bound node
//!
//! **Relational operators:**
//! - [`FilterOperator`], [`ProjectOperator`], [`AggregateOperator`],
//!   [`SortOperator`], [`DistinctOperator`], [`SkipLimitOperator`],
//!   [`UnwindOperator`]
//!
//! **Writes:** [`CreateOperator`], [`SetPropertyOperator`], [`DeleteOperator`]

mod aggregate;
mod distinct;
mod expand;
mod filter;
mod limit;
mod mutation;
mod project;
mod scan;
mod single_row;
mod sort;
mod unwind;

pub use aggregate::AggregateOperator;
pub use distinct::DistinctOperator;
pub use expand::{ExpandOperator, ExpandSpec};
pub use filter::FilterOperator;
pub use limit::SkipLimitOperator;
pub use mutation::{CreateOperator, CreateStep, DeleteOperator, SetItem, SetPropertyOperator};
pub use project::ProjectOperator;
pub use scan::{NodeLookupOperator, NodeScanOperator};
pub use single_row::{EmptyOperator, SingleRowOperator};
pub use sort::{SortKey, SortOperator};
pub use unwind::UnwindOperator;

use std::time::Duration;

use thiserror::Error;
use trellis_common::types::Value;
use trellis_common::utils::error::Error as TrellisError;

/// One row of slot values.
pub type Row = Vec<Value>;

/// Result of pulling from an operator.
pub type OperatorResult = Result<Option<Row>, OperatorError>;

pub type BoxedOperator = Box<dyn Operator>;

/// Error during operator execution.
#[derive(Error, Debug, Clone)]
pub enum OperatorError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    /// Checked integer arithmetic failed.
    #[error("overflow: {0}")]
    Overflow(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Execution(String),
    /// A storage or transaction error, passed through unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Wraps the crate-wide error so [`OperatorError`] can stay `Clone`.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct StorageError(pub std::sync::Arc<TrellisError>);

impl From<TrellisError> for OperatorError {
    fn from(err: TrellisError) -> Self {
        Self::Storage(StorageError(std::sync::Arc::new(err)))
    }
}

impl OperatorError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, found: &Value) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.type_name().to_string(),
        }
    }
}

impl From<OperatorError> for TrellisError {
    fn from(err: OperatorError) -> Self {
        match err {
            OperatorError::Storage(StorageError(inner)) => {
                std::sync::Arc::try_unwrap(inner).unwrap_or_else(|shared| Self::execution(shared.to_string()))
            }
            other => Self::execution(other.to_string()),
        }
    }
}

/// The core trait for pull-based operators.
///
/// Call [`next()`](Self::next) until it returns `None`. An operator that has
/// returned an error is not pulled again.
pub trait Operator: Send + Sync {
    /// Pulls the next row. Returns `None` when exhausted.
    fn next(&mut self) -> OperatorResult;

    /// Resets to the initial state so the operator can be iterated again.
    fn reset(&mut self);

    /// Name for EXPLAIN output and logs.
    fn name(&self) -> &'static str;
}


#[cfg(test)]
mod tests {
    use super::*;
    use trellis_common::utils::error::{QueryErrorKind, TransactionError};

    #[test]
    fn test_storage_errors_pass_through() {
        let err: OperatorError = TrellisError::from(TransactionError::WriteConflict("x".into())).into();
        let back = TrellisError::from(err);
        assert!(matches!(back, TrellisError::Transaction(TransactionError::WriteConflict(_))));
    }

    #[test]
    fn test_operator_errors_become_execution_errors() {
        let back = TrellisError::from(OperatorError::Overflow("1 + 2".into()));
        assert_eq!(back.query_kind(), Some(QueryErrorKind::Execution));
        assert!(back.to_string().contains("overflow"));
    }
}
