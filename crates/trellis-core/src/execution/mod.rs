//! Query execution: scalar expressions, aggregates and pull-based row
//! operators.
//!
//! Operators exchange fixed-width rows (`Vec<Value>`). Each variable of a
//! query part owns a slot, so a scan or expand writes into its slot and
//! leaves the others alone, whatever order the planner chose.

mod context;
pub mod expression;
pub mod operators;

pub use context::ExecutionContext;
pub use expression::{AggregateExpr, AggregateFunction, BinaryOp, Expr, Function, UnaryOp};
pub use operators::{BoxedOperator, Operator, OperatorError, OperatorResult, Row};
