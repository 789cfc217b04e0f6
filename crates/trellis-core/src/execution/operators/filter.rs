//! Keeps the rows for which a predicate is `true`.

use super::{BoxedOperator, Operator, OperatorResult};
use crate::execution::Expr;

pub struct FilterOperator {
    input: BoxedOperator,
    predicate: Expr,
}

impl FilterOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, predicate: Expr) -> Self {
        Self { input, predicate }
    }
}

impl Operator for FilterOperator {
    fn next(&mut self) -> OperatorResult {
        while let Some(row) = self.input.next()? {
            if self.predicate.eval_predicate(&row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.input.reset();
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::BinaryOp;
    use crate::execution::operators::test_support::{RowsOperator, drain, ints};
    use trellis_common::types::Value;

    #[test]
    fn test_filter_drops_false_and_null() {
        let mut rows = ints(&[1, 5, 10]);
        rows.push(vec![Value::Null]);
        let predicate = Expr::binary(BinaryOp::Gt, Expr::Column(0), Expr::Literal(Value::Int64(3)));
        let mut op = FilterOperator::new(RowsOperator::boxed(rows), predicate);
        assert_eq!(drain(&mut op), ints(&[5, 10]));
    }

    #[test]
    fn test_non_boolean_predicate_fails() {
        let mut op = FilterOperator::new(RowsOperator::boxed(ints(&[1])), Expr::Column(0));
        assert!(op.next().is_err());
    }
}
