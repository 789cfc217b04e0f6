//! Grouped and global aggregation.
//!
//! Groups come out in the order their first row arrived. Without grouping
//! keys an aggregation always yields exactly one row, even over no input:
//! `count` is 0, `sum` is 0, `collect` is `[]` and the rest are `NULL`.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use trellis_common::memory::{BufferPool, Reservation};
use trellis_common::types::{HashableValue, Value};
use trellis_common::utils::hash::{FxHashSet, fx_set};

use super::{BoxedOperator, Operator, OperatorError, OperatorResult, Row};
use crate::execution::{AggregateExpr, AggregateFunction, Expr};

const GROUP_OVERHEAD: usize = 64;

enum State {
    Count(i64),
    Sum { int: i64, float: f64, is_float: bool },
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

struct Accumulator {
    state: State,
    seen: Option<FxHashSet<HashableValue>>,
}

impl Accumulator {
    fn new(agg: &AggregateExpr) -> Self {
        let state = match agg.function {
            AggregateFunction::Count | AggregateFunction::CountStar => State::Count(0),
            AggregateFunction::Sum => State::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
            },
            AggregateFunction::Avg => State::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => State::Min(None),
            AggregateFunction::Max => State::Max(None),
            AggregateFunction::Collect => State::Collect(Vec::new()),
        };
        Self {
            state,
            seen: agg.distinct.then(fx_set),
        }
    }

    /// Folds one input value in. Returns the bytes newly retained.
    fn update(&mut self, value: Option<Value>) -> Result<usize, OperatorError> {
        let Some(value) = value else {
            // count(*)
            if let State::Count(n) = &mut self.state {
                *n += 1;
            }
            return Ok(0);
        };
        if value.is_null() {
            return Ok(0);
        }
        let mut retained = 0;
        if let Some(seen) = &mut self.seen {
            if !seen.insert(HashableValue::new(value.clone())) {
                return Ok(0);
            }
            retained += value.estimated_size();
        }
        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Sum { int, float, is_float } => match value {
                Value::Int64(i) if !*is_float => {
                    *int = int
                        .checked_add(i)
                        .ok_or_else(|| OperatorError::Overflow(format!("sum exceeds INT64 range at {int} + {i}")))?;
                }
                Value::Int64(i) => *float += i as f64,
                Value::Float64(f) => {
                    if !*is_float {
                        *is_float = true;
                        *float = *int as f64;
                    }
                    *float += f;
                }
                other => return Err(OperatorError::type_mismatch("numeric", &other)),
            },
            State::Avg { sum, count } => {
                *sum += value
                    .as_number()
                    .ok_or_else(|| OperatorError::type_mismatch("numeric", &value))?;
                *count += 1;
            }
            State::Min(current) => {
                if current.as_ref().is_none_or(|c| value.total_cmp(c).is_lt()) {
                    *current = Some(value);
                }
            }
            State::Max(current) => {
                if current.as_ref().is_none_or(|c| value.total_cmp(c).is_gt()) {
                    *current = Some(value);
                }
            }
            State::Collect(items) => {
                retained += value.estimated_size();
                items.push(value);
            }
        }
        Ok(retained)
    }

    fn finish(self) -> Value {
        match self.state {
            State::Count(n) => Value::Int64(n),
            State::Sum { int, float, is_float } => {
                if is_float {
                    Value::Float64(float)
                } else {
                    Value::Int64(int)
                }
            }
            State::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float64(sum / count as f64)
                }
            }
            State::Min(v) | State::Max(v) => v.unwrap_or(Value::Null),
            State::Collect(items) => Value::List(items.into()),
        }
    }
}

type Groups = IndexMap<Vec<HashableValue>, Vec<Accumulator>, FxBuildHasher>;

/// Output rows hold the group keys, then the aggregates, padded to `width`.
pub struct AggregateOperator {
    input: BoxedOperator,
    group_by: Vec<Expr>,
    aggregates: Vec<AggregateExpr>,
    width: usize,
    output: Option<VecDeque<Row>>,
    memory: Reservation,
}

impl AggregateOperator {
    #[must_use]
    pub fn new(
        input: BoxedOperator,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        width: usize,
        pool: &Arc<BufferPool>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            width,
            output: None,
            memory: pool.reservation(),
        }
    }

    fn accumulators(&self) -> Vec<Accumulator> {
        self.aggregates.iter().map(Accumulator::new).collect()
    }

    fn consume(&mut self) -> Result<VecDeque<Row>, OperatorError> {
        let mut groups = Groups::default();
        while let Some(row) = self.input.next()? {
            let key = self
                .group_by
                .iter()
                .map(|e| e.eval(&row).map(HashableValue::new))
                .collect::<Result<Vec<_>, _>>()?;
            if !groups.contains_key(&key) {
                let bytes = key.iter().map(|k| k.inner().estimated_size()).sum::<usize>() + GROUP_OVERHEAD;
                self.memory.grow(bytes)?;
                let fresh = self.accumulators();
                groups.insert(key.clone(), fresh);
            }
            let Some(accs) = groups.get_mut(&key) else {
                continue;
            };
            for (acc, agg) in accs.iter_mut().zip(&self.aggregates) {
                let value = agg.arg.as_ref().map(|e| e.eval(&row)).transpose()?;
                let retained = acc.update(value)?;
                if retained > 0 {
                    self.memory.grow(retained)?;
                }
            }
        }
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(Vec::new(), self.accumulators());
        }

        let width = self.width.max(self.group_by.len() + self.aggregates.len());
        Ok(groups
            .into_iter()
            .map(|(key, accs)| {
                let mut row: Row = key.into_iter().map(HashableValue::into_inner).collect();
                row.extend(accs.into_iter().map(Accumulator::finish));
                row.resize(width, Value::Null);
                row
            })
            .collect())
    }
}

impl Operator for AggregateOperator {
    fn next(&mut self) -> OperatorResult {
        if self.output.is_none() {
            let rows = self.consume()?;
            self.output = Some(rows);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self) {
        self.input.reset();
        self.output = None;
        let size = self.memory.size();
        self.memory.shrink(size);
    }

    fn name(&self) -> &'static str {
        "Aggregate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::test_support::{RowsOperator, drain, ints};

    fn agg(function: AggregateFunction) -> AggregateExpr {
        AggregateExpr {
            function,
            arg: (function != AggregateFunction::CountStar).then_some(Expr::Column(0)),
            distinct: false,
        }
    }

    fn run(rows: Vec<Row>, group_by: Vec<Expr>, aggregates: Vec<AggregateExpr>) -> Vec<Row> {
        let pool = BufferPool::new(1 << 20);
        let mut op = AggregateOperator::new(RowsOperator::boxed(rows), group_by, aggregates, 0, &pool);
        drain(&mut op)
    }

    #[test]
    fn test_global_aggregates() {
        let mut rows = ints(&[1, 2, 3]);
        rows.push(vec![Value::Null]);
        let out = run(
            rows,
            vec![],
            vec![
                agg(AggregateFunction::CountStar),
                agg(AggregateFunction::Count),
                agg(AggregateFunction::Sum),
                agg(AggregateFunction::Avg),
                agg(AggregateFunction::Min),
                agg(AggregateFunction::Max),
            ],
        );
        assert_eq!(
            out,
            vec![vec![
                Value::Int64(4),
                Value::Int64(3),
                Value::Int64(6),
                Value::Float64(2.0),
                Value::Int64(1),
                Value::Int64(3),
            ]]
        );
    }

    #[test]
    fn test_global_aggregates_over_nothing() {
        let out = run(
            vec![],
            vec![],
            vec![
                agg(AggregateFunction::CountStar),
                agg(AggregateFunction::Sum),
                agg(AggregateFunction::Avg),
                agg(AggregateFunction::Collect),
            ],
        );
        assert_eq!(
            out,
            vec![vec![Value::Int64(0), Value::Int64(0), Value::Null, Value::from(Vec::<i64>::new())]]
        );
    }

    #[test]
    fn test_grouped_keeps_arrival_order() {
        let rows = vec![
            vec![Value::from("b"), Value::Int64(1)],
            vec![Value::from("a"), Value::Int64(2)],
            vec![Value::from("b"), Value::Int64(3)],
        ];
        let sum = AggregateExpr {
            function: AggregateFunction::Sum,
            arg: Some(Expr::Column(1)),
            distinct: false,
        };
        let out = run(rows, vec![Expr::Column(0)], vec![sum]);
        assert_eq!(
            out,
            vec![
                vec![Value::from("b"), Value::Int64(4)],
                vec![Value::from("a"), Value::Int64(2)],
            ]
        );
    }

    #[test]
    fn test_grouped_over_nothing_is_empty() {
        assert!(run(vec![], vec![Expr::Column(0)], vec![agg(AggregateFunction::Count)]).is_empty());
    }

    #[test]
    fn test_distinct_count_and_collect() {
        let mut count = agg(AggregateFunction::Count);
        count.distinct = true;
        let mut collect = agg(AggregateFunction::Collect);
        collect.distinct = true;
        let out = run(ints(&[1, 1, 2]), vec![], vec![count, collect]);
        assert_eq!(out, vec![vec![Value::Int64(2), Value::from(vec![1i64, 2])]]);
    }

    #[test]
    fn test_sum_overflow_and_mixed() {
        let pool = BufferPool::new(1 << 20);
        let mut op = AggregateOperator::new(
            RowsOperator::boxed(ints(&[i64::MAX, 1])),
            vec![],
            vec![agg(AggregateFunction::Sum)],
            0,
            &pool,
        );
        assert!(matches!(op.next(), Err(OperatorError::Overflow(_))));

        let rows = vec![vec![Value::Int64(1)], vec![Value::Float64(0.5)]];
        let out = run(rows, vec![], vec![agg(AggregateFunction::Sum)]);
        assert_eq!(out, vec![vec![Value::Float64(1.5)]]);
    }

    #[test]
    fn test_sum_of_strings_fails() {
        let pool = BufferPool::new(1 << 20);
        let rows = vec![vec![Value::from("x")]];
        let mut op = AggregateOperator::new(RowsOperator::boxed(rows), vec![], vec![agg(AggregateFunction::Sum)], 0, &pool);
        assert!(matches!(op.next(), Err(OperatorError::TypeMismatch { .. })));
    }
}
