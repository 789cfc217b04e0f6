//! Evaluates one expression per output slot.

use trellis_common::types::Value;

use super::{BoxedOperator, Operator, OperatorResult};
use crate::execution::Expr;

/// Builds rows of `width` slots: the first `exprs.len()` hold the
/// projected values, the rest start out `NULL` for the next query part.
pub struct ProjectOperator {
    input: BoxedOperator,
    exprs: Vec<Expr>,
    width: usize,
}

impl ProjectOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, exprs: Vec<Expr>, width: usize) -> Self {
        let width = width.max(exprs.len());
        Self { input, exprs, width }
    }
}

impl Operator for ProjectOperator {
    fn next(&mut self) -> OperatorResult {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(self.width);
        for expr in &self.exprs {
            out.push(expr.eval(&row)?);
        }
        out.resize(self.width, Value::Null);
        Ok(Some(out))
    }

    fn reset(&mut self) {
        self.input.reset();
    }

    fn name(&self) -> &'static str {
        "Project"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::BinaryOp;
    use crate::execution::operators::test_support::{RowsOperator, drain, ints};

    #[test]
    fn test_project_and_pad() {
        let double = Expr::binary(BinaryOp::Mul, Expr::Column(0), Expr::Literal(Value::Int64(2)));
        let mut op = ProjectOperator::new(RowsOperator::boxed(ints(&[1, 2])), vec![double], 2);
        assert_eq!(
            drain(&mut op),
            vec![vec![Value::Int64(2), Value::Null], vec![Value::Int64(4), Value::Null]]
        );
    }

    #[test]
    fn test_row_error_surfaces_on_its_row() {
        let div = Expr::binary(BinaryOp::Div, Expr::Literal(Value::Int64(10)), Expr::Column(0));
        let mut op = ProjectOperator::new(RowsOperator::boxed(ints(&[5, 0])), vec![div], 1);
        assert_eq!(op.next().unwrap(), Some(vec![Value::Int64(2)]));
        assert!(op.next().is_err());
    }
}
