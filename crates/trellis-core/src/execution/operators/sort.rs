//! `ORDER BY`. Materializes its input, then sorts stably.
//!
//! Ascending order puts `NULL` last and descending order puts it first, the
//! total order of [`Value::total_cmp`](trellis_common::types::Value::total_cmp)
//! read either way.

use std::cmp::Ordering;
use std::sync::Arc;

use trellis_common::memory::{BufferPool, Reservation};
use trellis_common::types::Value;

use super::{BoxedOperator, Operator, OperatorResult, Row};
use crate::execution::Expr;

const ROW_OVERHEAD: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub descending: bool,
}

pub struct SortOperator {
    input: BoxedOperator,
    keys: Vec<SortKey>,
    sorted: Option<std::vec::IntoIter<Row>>,
    memory: Reservation,
}

impl SortOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, keys: Vec<SortKey>, pool: &Arc<BufferPool>) -> Self {
        Self {
            input,
            keys,
            sorted: None,
            memory: pool.reservation(),
        }
    }

    fn materialize(&mut self) -> Result<Vec<Row>, super::OperatorError> {
        let mut entries: Vec<(Vec<Value>, Row)> = Vec::new();
        while let Some(row) = self.input.next()? {
            let sort_values = self
                .keys
                .iter()
                .map(|k| k.expr.eval(&row))
                .collect::<Result<Vec<_>, _>>()?;
            let bytes = row.iter().chain(&sort_values).map(Value::estimated_size).sum::<usize>() + ROW_OVERHEAD;
            self.memory.grow(bytes)?;
            entries.push((sort_values, row));
        }
        let keys = &self.keys;
        entries.sort_by(|(a, _), (b, _)| {
            for ((x, y), key) in a.iter().zip(b).zip(keys) {
                let ord = x.total_cmp(y);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(entries.into_iter().map(|(_, row)| row).collect())
    }
}

impl Operator for SortOperator {
    fn next(&mut self) -> OperatorResult {
        if self.sorted.is_none() {
            let rows = self.materialize()?;
            self.sorted = Some(rows.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next))
    }

    fn reset(&mut self) {
        self.input.reset();
        self.sorted = None;
        let size = self.memory.size();
        self.memory.shrink(size);
    }

    fn name(&self) -> &'static str {
        "Sort"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::test_support::{RowsOperator, drain, ints};

    fn sort(rows: Vec<Row>, descending: bool) -> Vec<Row> {
        let pool = BufferPool::new(1 << 20);
        let keys = vec![SortKey {
            expr: Expr::Column(0),
            descending,
        }];
        let mut op = SortOperator::new(RowsOperator::boxed(rows), keys, &pool);
        drain(&mut op)
    }

    #[test]
    fn test_sort_with_nulls() {
        let mut rows = ints(&[3, 1]);
        rows.insert(1, vec![Value::Null]);
        rows.push(vec![Value::Int64(2)]);

        let asc = sort(rows.clone(), false);
        assert_eq!(asc.last().unwrap()[0], Value::Null);
        assert_eq!(asc[0][0], Value::Int64(1));

        let desc = sort(rows, true);
        assert_eq!(desc[0][0], Value::Null);
        assert_eq!(desc[1][0], Value::Int64(3));
    }

    #[test]
    fn test_sort_is_stable() {
        let rows = vec![
            vec![Value::Int64(1), Value::from("a")],
            vec![Value::Int64(0), Value::from("b")],
            vec![Value::Int64(1), Value::from("c")],
        ];
        let sorted = sort(rows, false);
        let tags: Vec<_> = sorted.iter().map(|r| r[1].to_string()).collect();
        assert_eq!(tags, ["b", "a", "c"]);
    }

    #[test]
    fn test_mixed_numbers() {
        let rows = vec![vec![Value::Float64(1.5)], vec![Value::Int64(1)], vec![Value::Int64(2)]];
        let sorted = sort(rows, false);
        assert_eq!(sorted[1][0], Value::Float64(1.5));
    }
}
