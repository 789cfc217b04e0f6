//! `UNWIND`: one output row per list element.

use trellis_common::types::Value;

use super::{BoxedOperator, Operator, OperatorResult, Row};
use crate::execution::Expr;

/// A `NULL` or empty list produces no rows; a scalar produces one.
pub struct UnwindOperator {
    input: BoxedOperator,
    expr: Expr,
    slot: usize,
    current: Option<(Row, Vec<Value>)>,
    position: usize,
}

impl UnwindOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, expr: Expr, slot: usize) -> Self {
        Self {
            input,
            expr,
            slot,
            current: None,
            position: 0,
        }
    }
}

impl Operator for UnwindOperator {
    fn next(&mut self) -> OperatorResult {
        loop {
            if let Some((row, items)) = &self.current {
                if let Some(item) = items.get(self.position) {
                    self.position += 1;
                    let mut out = row.clone();
                    out[self.slot] = item.clone();
                    return Ok(Some(out));
                }
                self.current = None;
            }
            let Some(row) = self.input.next()? else {
                return Ok(None);
            };
            let items = match self.expr.eval(&row)? {
                Value::Null => Vec::new(),
                Value::List(items) => items.to_vec(),
                scalar => vec![scalar],
            };
            self.current = Some((row, items));
            self.position = 0;
        }
    }

    fn reset(&mut self) {
        self.input.reset();
        self.current = None;
        self.position = 0;
    }

    fn name(&self) -> &'static str {
        "Unwind"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::SingleRowOperator;
    use crate::execution::operators::test_support::drain;

    fn unwind(value: Value) -> Vec<Row> {
        let mut op = UnwindOperator::new(Box::new(SingleRowOperator::new(1)), Expr::Literal(value), 0);
        drain(&mut op)
    }

    #[test]
    fn test_unwind_list() {
        let rows = unwind(Value::from(vec![1i64, 2, 3]));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec![Value::Int64(3)]);
    }

    #[test]
    fn test_unwind_null_and_empty() {
        assert!(unwind(Value::Null).is_empty());
        assert!(unwind(Value::from(Vec::<i64>::new())).is_empty());
    }

    #[test]
    fn test_unwind_scalar() {
        assert_eq!(unwind(Value::Int64(7)), vec![vec![Value::Int64(7)]]);
    }
}
