//! Logical query plan representation.
//!
//! A plan is a tree of [`LogicalOperator`]s whose leaves produce rows and
//! whose root yields the result. Every operator already carries the resolved
//! slots, table ids and bound expressions its physical counterpart needs, so
//! turning a plan into an operator tree is a straight walk. Plans are
//! immutable and cached; each execution builds a fresh operator tree.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use trellis_common::types::{LogicalType, TableId};
use trellis_core::execution::operators::{
    AggregateOperator, CreateOperator, CreateStep, DeleteOperator, DistinctOperator, EmptyOperator,
    ExpandOperator, ExpandSpec, FilterOperator, NodeLookupOperator, NodeScanOperator, ProjectOperator, SetItem,
    SetPropertyOperator, SingleRowOperator, SkipLimitOperator, SortKey, SortOperator, UnwindOperator,
};
use trellis_core::execution::{AggregateExpr, BoxedOperator, ExecutionContext, Expr};
use trellis_core::graph::Direction;

/// A logical query plan plus what the caller needs to know about its output.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    /// The root operator of the plan.
    pub root: LogicalOperator,
    /// Result column names; the root's rows carry them in their leading slots.
    pub columns: Vec<String>,
    pub column_types: Vec<LogicalType>,
    /// The plan contains a write operator and must run eagerly.
    pub is_write: bool,
}

impl LogicalPlan {
    /// Instantiates the physical operators for one execution.
    #[must_use]
    pub fn build(&self, ctx: &Arc<ExecutionContext>) -> BoxedOperator {
        self.root.build(ctx)
    }

    /// The plan as indented text, one operator per line, root first.
    #[must_use]
    pub fn explain(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.root.describe(0, &mut lines);
        lines
    }
}

/// A logical operator in the query plan.
#[derive(Debug, Clone)]
pub enum LogicalOperator {
    /// One row of `NULL` slots.
    SingleRow { width: usize },

    /// No rows.
    Empty,

    /// Scan every node of some tables, per input row.
    NodeScan {
        input: Box<LogicalOperator>,
        tables: Vec<TableId>,
        slot: usize,
        /// For EXPLAIN: the pattern element, e.g. `n:Person`.
        label: String,
    },

    /// Primary-key lookup, per input row.
    NodeLookup {
        input: Box<LogicalOperator>,
        table: TableId,
        key: Expr,
        slot: usize,
        label: String,
    },

    /// Follow relationships from a bound node.
    Expand {
        input: Box<LogicalOperator>,
        spec: ExpandSpec,
        label: String,
    },

    Filter {
        input: Box<LogicalOperator>,
        predicate: Expr,
    },

    Project {
        input: Box<LogicalOperator>,
        exprs: Vec<Expr>,
        width: usize,
    },

    Aggregate {
        input: Box<LogicalOperator>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        width: usize,
    },

    /// Keep the first row per distinct prefix of `key_width` slots.
    Distinct {
        input: Box<LogicalOperator>,
        key_width: usize,
    },

    Sort {
        input: Box<LogicalOperator>,
        keys: Vec<SortKey>,
    },

    SkipLimit {
        input: Box<LogicalOperator>,
        skip: usize,
        limit: Option<usize>,
    },

    Unwind {
        input: Box<LogicalOperator>,
        expr: Expr,
        slot: usize,
    },

    Create {
        input: Box<LogicalOperator>,
        steps: Vec<CreateStep>,
    },

    SetProperty {
        input: Box<LogicalOperator>,
        items: Vec<SetItem>,
    },

    Delete {
        input: Box<LogicalOperator>,
        slots: Vec<usize>,
        detach: bool,
    },
}

impl LogicalOperator {
    /// The operator feeding this one, if any.
    #[must_use]
    pub fn input(&self) -> Option<&LogicalOperator> {
        match self {
            Self::SingleRow { .. } | Self::Empty => None,
            Self::NodeScan { input, .. }
            | Self::NodeLookup { input, .. }
            | Self::Expand { input, .. }
            | Self::Filter { input, .. }
            | Self::Project { input, .. }
            | Self::Aggregate { input, .. }
            | Self::Distinct { input, .. }
            | Self::Sort { input, .. }
            | Self::SkipLimit { input, .. }
            | Self::Unwind { input, .. }
            | Self::Create { input, .. }
            | Self::SetProperty { input, .. }
            | Self::Delete { input, .. } => Some(input),
        }
    }

    /// Whether this operator or anything below it changes the graph.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::SetProperty { .. } | Self::Delete { .. })
            || self.input().is_some_and(Self::is_write)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SingleRow { .. } => "SingleRow",
            Self::Empty => "Empty",
            Self::NodeScan { .. } => "NodeScan",
            Self::NodeLookup { .. } => "NodeLookup",
            Self::Expand { .. } => "Expand",
            Self::Filter { .. } => "Filter",
            Self::Project { .. } => "Project",
            Self::Aggregate { .. } => "Aggregate",
            Self::Distinct { .. } => "Distinct",
            Self::Sort { .. } => "Sort",
            Self::SkipLimit { .. } => "SkipLimit",
            Self::Unwind { .. } => "Unwind",
            Self::Create { .. } => "Create",
            Self::SetProperty { .. } => "SetProperty",
            Self::Delete { .. } => "Delete",
        }
    }

    fn build(&self, ctx: &Arc<ExecutionContext>) -> BoxedOperator {
        let pool = &ctx.pool;
        match self {
            Self::SingleRow { width } => Box::new(SingleRowOperator::new(*width)),
            Self::Empty => Box::new(EmptyOperator),
            Self::NodeScan {
                input, tables, slot, ..
            } => Box::new(NodeScanOperator::new(
                input.build(ctx),
                Arc::clone(ctx),
                tables.clone(),
                *slot,
            )),
            Self::NodeLookup {
                input, table, key, slot, ..
            } => Box::new(NodeLookupOperator::new(
                input.build(ctx),
                Arc::clone(ctx),
                *table,
                key.clone(),
                *slot,
            )),
            Self::Expand { input, spec, .. } => {
                Box::new(ExpandOperator::new(input.build(ctx), Arc::clone(ctx), spec.clone()))
            }
            Self::Filter { input, predicate } => Box::new(FilterOperator::new(input.build(ctx), predicate.clone())),
            Self::Project { input, exprs, width } => {
                Box::new(ProjectOperator::new(input.build(ctx), exprs.clone(), *width))
            }
            Self::Aggregate {
                input,
                group_by,
                aggregates,
                width,
            } => Box::new(AggregateOperator::new(
                input.build(ctx),
                group_by.clone(),
                aggregates.clone(),
                *width,
                pool,
            )),
            Self::Distinct { input, key_width } => {
                Box::new(DistinctOperator::new(input.build(ctx), *key_width, pool))
            }
            Self::Sort { input, keys } => Box::new(SortOperator::new(input.build(ctx), keys.clone(), pool)),
            Self::SkipLimit { input, skip, limit } => {
                Box::new(SkipLimitOperator::new(input.build(ctx), *skip, *limit))
            }
            Self::Unwind { input, expr, slot } => Box::new(UnwindOperator::new(input.build(ctx), expr.clone(), *slot)),
            Self::Create { input, steps } => {
                Box::new(CreateOperator::new(input.build(ctx), Arc::clone(ctx), steps.clone()))
            }
            Self::SetProperty { input, items } => {
                Box::new(SetPropertyOperator::new(input.build(ctx), Arc::clone(ctx), items.clone()))
            }
            Self::Delete { input, slots, detach } => Box::new(DeleteOperator::new(
                input.build(ctx),
                Arc::clone(ctx),
                slots.clone(),
                *detach,
            )),
        }
    }

    fn describe(&self, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}{self}", "  ".repeat(depth)));
        if let Some(input) = self.input() {
            input.describe(depth + 1, lines);
        }
    }
}

fn joined<T: fmt::Display>(items: &[T]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{item}");
    }
    out
}

/// One line of EXPLAIN output, without the inputs.
impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Self::SingleRow { .. } | Self::Empty => Ok(()),
            Self::NodeScan { slot, label, .. } => write!(f, " ({label}) -> #{slot}"),
            Self::NodeLookup { key, slot, label, .. } => write!(f, " ({label}) key = {key} -> #{slot}"),
            Self::Expand { spec, label, .. } => {
                let arrow = match spec.direction {
                    Direction::Outgoing => "->",
                    Direction::Incoming => "<-",
                    Direction::Both => "--",
                };
                write!(f, " #{} {arrow} #{} {label}", spec.from_slot, spec.to_slot)?;
                if spec.to_bound {
                    write!(f, " (bound)")?;
                }
                Ok(())
            }
            Self::Filter { predicate, .. } => write!(f, " {predicate}"),
            Self::Project { exprs, .. } => write!(f, " [{}]", joined(exprs)),
            Self::Aggregate {
                group_by, aggregates, ..
            } => write!(f, " keys [{}] aggregates [{}]", joined(group_by), joined(aggregates)),
            Self::Distinct { key_width, .. } => write!(f, " on {key_width} columns"),
            Self::Sort { keys, .. } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, if k.descending { "DESC" } else { "ASC" }))
                    .collect();
                write!(f, " [{}]", keys.join(", "))
            }
            Self::SkipLimit { skip, limit, .. } => match limit {
                Some(limit) => write!(f, " skip {skip} limit {limit}"),
                None => write!(f, " skip {skip}"),
            },
            Self::Unwind { expr, slot, .. } => write!(f, " {expr} -> #{slot}"),
            Self::Create { steps, .. } => write!(f, " {} elements", steps.len()),
            Self::SetProperty { items, .. } => {
                let items: Vec<String> = items
                    .iter()
                    .map(|i| format!("#{}.{} = {}", i.slot, i.key, i.value))
                    .collect();
                write!(f, " [{}]", items.join(", "))
            }
            Self::Delete { slots, detach, .. } => {
                let slots: Vec<String> = slots.iter().map(|s| format!("#{s}")).collect();
                write!(f, " {}[{}]", if *detach { "DETACH " } else { "" }, slots.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_common::types::Value;
    use trellis_core::execution::BinaryOp;

    fn scan_filter() -> LogicalOperator {
        LogicalOperator::Filter {
            input: Box::new(LogicalOperator::NodeScan {
                input: Box::new(LogicalOperator::SingleRow { width: 1 }),
                tables: vec![TableId::new(0)],
                slot: 0,
                label: "n:Person".into(),
            }),
            predicate: Expr::binary(
                BinaryOp::Gt,
                Expr::property(Expr::Column(0), "age"),
                Expr::Literal(Value::Int64(30)),
            ),
        }
    }

    #[test]
    fn test_explain_lines() {
        let plan = LogicalPlan {
            root: LogicalOperator::Project {
                input: Box::new(scan_filter()),
                exprs: vec![Expr::property(Expr::Column(0), "name")],
                width: 1,
            },
            columns: vec!["n.name".into()],
            column_types: vec![LogicalType::String],
            is_write: false,
        };
        assert_eq!(
            plan.explain(),
            vec![
                "Project [#0.name]".to_string(),
                "  Filter (#0.age > 30)".to_string(),
                "    NodeScan (n:Person) -> #0".to_string(),
                "      SingleRow".to_string(),
            ]
        );
    }

    #[test]
    fn test_is_write() {
        assert!(!scan_filter().is_write());
        let delete = LogicalOperator::Delete {
            input: Box::new(scan_filter()),
            slots: vec![0],
            detach: true,
        };
        assert!(delete.is_write());
        let limited = LogicalOperator::SkipLimit {
            input: Box::new(delete),
            skip: 0,
            limit: Some(1),
        };
        assert!(limited.is_write());
        assert_eq!(limited.to_string(), "SkipLimit skip 0 limit 1");
    }
}
