//! Leaf operators that read no storage.
//!
//! - `SingleRowOperator`: one row of `NULL` slots. Feeds queries without a
//!   `MATCH`, such as `RETURN 1` or `UNWIND [1, 2] AS x RETURN x`.
//! - `EmptyOperator`: no rows. Used when planning proves nothing can match,
//!   for example a `WHERE false`.

use trellis_common::types::Value;

use super::{Operator, OperatorResult};

pub struct SingleRowOperator {
    width: usize,
    produced: bool,
}

impl SingleRowOperator {
    /// A single row with `width` slots, all `NULL`.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self { width, produced: false }
    }
}

impl Operator for SingleRowOperator {
    fn next(&mut self) -> OperatorResult {
        if self.produced {
            return Ok(None);
        }
        self.produced = true;
        Ok(Some(vec![Value::Null; self.width]))
    }

    fn reset(&mut self) {
        self.produced = false;
    }

    fn name(&self) -> &'static str {
        "SingleRow"
    }
}

#[derive(Default)]
pub struct EmptyOperator;

impl Operator for EmptyOperator {
    fn next(&mut self) -> OperatorResult {
        Ok(None)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "Empty"
    }
}
