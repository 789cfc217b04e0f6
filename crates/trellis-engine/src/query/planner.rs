//! Bound query to logical plan.
//!
//! Planning is rule based. For each path pattern the planner picks a start
//! node (already bound, then a primary-key lookup, then the smallest scan)
//! and expands outward from it, right first. Filters are pushed to the
//! lowest point where every slot they read is bound.

use trellis_common::types::{LogicalType, TableId, Value};
use trellis_common::utils::hash::{FxHashSet, fx_set};
use trellis_core::execution::operators::ExpandSpec;
use trellis_core::execution::{BinaryOp, Expr};
use trellis_core::graph::{Catalog, GraphStore};

use super::binder::{BoundClause, BoundMatch, BoundNode, BoundPattern, BoundProjection, BoundQuery};
use super::plan::{LogicalOperator, LogicalPlan};

/// How a pattern's first node gets its value.
#[derive(Debug, Clone, PartialEq)]
enum Access {
    Bound,
    Lookup { table: TableId, key: Expr, conjunct: usize },
    Scan { tables: Vec<TableId>, cardinality: usize },
}

impl Access {
    fn rank(&self) -> (u8, usize) {
        match self {
            Self::Bound => (0, 0),
            Self::Lookup { .. } => (1, 0),
            Self::Scan { cardinality, .. } => (2, *cardinality),
        }
    }
}

/// Turns bound queries into plans, using table sizes as the only statistic.
pub struct Planner<'a> {
    catalog: &'a Catalog,
    store: &'a GraphStore,
}

impl<'a> Planner<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog, store: &'a GraphStore) -> Self {
        Self { catalog, store }
    }

    #[must_use]
    pub fn plan(&self, query: BoundQuery) -> LogicalPlan {
        let width = query.width;
        let mut root = LogicalOperator::SingleRow { width };
        for clause in query.clauses {
            root = match clause {
                BoundClause::Match(m) => self.plan_match(root, m),
                BoundClause::Unwind { expr, slot } => LogicalOperator::Unwind {
                    input: Box::new(root),
                    expr,
                    slot,
                },
                BoundClause::Create(steps) => LogicalOperator::Create {
                    input: Box::new(root),
                    steps,
                },
                BoundClause::Set(items) => LogicalOperator::SetProperty {
                    input: Box::new(root),
                    items,
                },
                BoundClause::Delete { slots, detach } => LogicalOperator::Delete {
                    input: Box::new(root),
                    slots,
                    detach,
                },
                BoundClause::Project(p) => plan_projection(root, p, width),
            };
        }
        let is_write = root.is_write();
        LogicalPlan {
            root,
            columns: query.columns,
            column_types: query.column_types,
            is_write,
        }
    }

    fn plan_match(&self, mut root: LogicalOperator, m: BoundMatch) -> LogicalOperator {
        let mut bound: FxHashSet<usize> = fx_set();
        bound.extend(m.bound.iter().copied());

        let mut pending = Vec::with_capacity(m.predicates.len());
        for predicate in m.predicates {
            if !is_constant(&predicate) {
                pending.push(predicate);
                continue;
            }
            match predicate.eval(&[]) {
                Ok(Value::Bool(true)) => {}
                // Never true: nothing can match. Writes below must still run.
                Ok(Value::Bool(false) | Value::Null) if !root.is_write() => {
                    tracing::debug!(%predicate, "constant predicate is never true");
                    return LogicalOperator::Empty;
                }
                _ => pending.push(predicate),
            }
        }

        root = apply_ready(root, &bound, &mut pending);
        for pattern in m.patterns {
            root = self.plan_pattern(root, pattern, &mut bound, &mut pending);
        }
        // Everything is bound by now; whatever is left reads only those slots.
        match Expr::conjunction(pending) {
            Some(predicate) => LogicalOperator::Filter {
                input: Box::new(root),
                predicate,
            },
            None => root,
        }
    }

    fn access(&self, node: &BoundNode, bound: &FxHashSet<usize>, pending: &[Expr]) -> Access {
        if bound.contains(&node.slot) {
            return Access::Bound;
        }
        if let [table] = node.tables.as_slice()
            && let Some(schema) = self.catalog.table(*table)
            && let Some(pk) = schema.primary_key()
        {
            for (i, conjunct) in pending.iter().enumerate() {
                if let Some(key) = key_equality(conjunct, node.slot, pk.name.as_str(), &pk.ty) {
                    return Access::Lookup {
                        table: *table,
                        key,
                        conjunct: i,
                    };
                }
            }
        }
        let tables: Vec<TableId> = if node.tables.is_empty() {
            self.catalog.node_tables().map(|t| t.id).collect()
        } else {
            node.tables.clone()
        };
        let cardinality = tables.iter().map(|t| self.store.table_cardinality(*t)).sum();
        Access::Scan { tables, cardinality }
    }

    fn plan_pattern(
        &self,
        mut root: LogicalOperator,
        pattern: BoundPattern,
        bound: &mut FxHashSet<usize>,
        pending: &mut Vec<Expr>,
    ) -> LogicalOperator {
        let mut best: Option<(usize, Access)> = None;
        for (i, node) in pattern.nodes.iter().enumerate() {
            let access = self.access(node, bound, pending);
            if best.as_ref().is_none_or(|(_, b)| access.rank() < b.rank()) {
                best = Some((i, access));
            }
        }
        let Some((start, access)) = best else {
            return root;
        };
        let first = &pattern.nodes[start];
        tracing::debug!(start = %first.label, access = ?access.rank(), "pattern start");

        root = match access {
            Access::Bound => root,
            Access::Lookup { table, key, conjunct } => {
                pending.remove(conjunct);
                LogicalOperator::NodeLookup {
                    input: Box::new(root),
                    table,
                    key,
                    slot: first.slot,
                    label: first.label.clone(),
                }
            }
            Access::Scan { tables, .. } => LogicalOperator::NodeScan {
                input: Box::new(root),
                tables,
                slot: first.slot,
                label: first.label.clone(),
            },
        };
        bound.insert(first.slot);
        root = apply_ready(root, bound, pending);

        let hops = pattern.hops.len();
        let right = (start..hops).map(|i| (i, i, i + 1, false));
        let left = (0..start).rev().map(|i| (i, i + 1, i, true));
        for (hop, from, to, reverse) in right.chain(left) {
            let rel = &pattern.hops[hop];
            let target = &pattern.nodes[to];
            let spec = ExpandSpec {
                from_slot: pattern.nodes[from].slot,
                edge_slot: rel.slot,
                to_slot: target.slot,
                direction: if reverse { rel.direction.reverse() } else { rel.direction },
                rel_tables: rel.tables.clone(),
                to_tables: target.tables.clone(),
                to_bound: bound.contains(&target.slot),
            };
            root = LogicalOperator::Expand {
                input: Box::new(root),
                spec,
                label: rel.label.clone(),
            };
            bound.insert(target.slot);
            if let Some(slot) = rel.slot {
                bound.insert(slot);
            }
            root = apply_ready(root, bound, pending);
        }
        root
    }
}

fn columns_of(expr: &Expr) -> Vec<usize> {
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    columns
}

fn is_constant(expr: &Expr) -> bool {
    columns_of(expr).is_empty()
}

/// Wraps `root` in a filter made of every pending conjunct it can already
/// evaluate.
fn apply_ready(root: LogicalOperator, bound: &FxHashSet<usize>, pending: &mut Vec<Expr>) -> LogicalOperator {
    let (ready, rest): (Vec<Expr>, Vec<Expr>) = pending
        .drain(..)
        .partition(|p| columns_of(p).iter().all(|c| bound.contains(c)));
    *pending = rest;
    match Expr::conjunction(ready) {
        Some(predicate) => LogicalOperator::Filter {
            input: Box::new(root),
            predicate,
        },
        None => root,
    }
}

/// Matches `#slot.pk = key` (either side) where the key is a literal of the
/// key's own type, so a hash lookup finds exactly what `=` would.
fn key_equality(
    conjunct: &Expr,
    slot: usize,
    pk: &str,
    pk_type: &LogicalType,
) -> Option<Expr> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let is_key = |e: &Expr| {
        matches!(e, Expr::Property { input, key } if **input == Expr::Column(slot) && key.as_str() == pk)
    };
    let value = if is_key(left) {
        right
    } else if is_key(right) {
        left
    } else {
        return None;
    };
    match value.as_ref() {
        Expr::Literal(v) if v.logical_type() == *pk_type => {}
        _ => return None,
    }
    Some(value.as_ref().clone())
}

fn plan_projection(mut root: LogicalOperator, p: BoundProjection, width: usize) -> LogicalOperator {
    let columns = p.exprs.len();
    match p.aggregate {
        None => {
            if !p.order_by.is_empty() {
                root = LogicalOperator::Sort {
                    input: Box::new(root),
                    keys: p.order_by,
                };
            }
            root = LogicalOperator::Project {
                input: Box::new(root),
                exprs: p.exprs,
                width,
            };
        }
        Some(agg) => {
            root = LogicalOperator::Aggregate {
                input: Box::new(root),
                group_by: agg.group_by,
                aggregates: agg.aggregates,
                width,
            };
            root = LogicalOperator::Project {
                input: Box::new(root),
                exprs: p.exprs,
                width,
            };
            if !p.order_by.is_empty() {
                root = LogicalOperator::Sort {
                    input: Box::new(root),
                    keys: p.order_by,
                };
            }
        }
    }
    if p.distinct {
        root = LogicalOperator::Distinct {
            input: Box::new(root),
            key_width: columns,
        };
    }
    if p.skip > 0 || p.limit.is_some() {
        root = LogicalOperator::SkipLimit {
            input: Box::new(root),
            skip: p.skip,
            limit: p.limit,
        };
    }
    if let Some(predicate) = p.filter {
        root = LogicalOperator::Filter {
            input: Box::new(root),
            predicate,
        };
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::binder::{Binder, Params};
    use trellis_adapters::query::cypher::ast::Statement;
    use trellis_adapters::query::cypher::parse;
    use trellis_common::types::{EpochId, TxId};
    use trellis_core::graph::{PropertyDef, TableSchema, TxView};

    /// Person has three rows, City one.
    fn store() -> GraphStore {
        let store = GraphStore::new();
        let person = TableSchema::node(
            "Person",
            vec![
                PropertyDef::new("name", LogicalType::String),
                PropertyDef::new("age", LogicalType::Int64),
            ],
            "name",
        )
        .unwrap();
        store.create_table(person).unwrap();
        let city = TableSchema::node("City", vec![PropertyDef::new("name", LogicalType::String)], "name").unwrap();
        store.create_table(city).unwrap();
        let catalog = store.catalog();
        let p = catalog.node_table("Person").unwrap().id;
        let c = catalog.node_table("City").unwrap().id;
        let lives = TableSchema::rel("LivesIn", p, c, Vec::new()).unwrap();
        store.create_table(lives).unwrap();

        let view = TxView::new(EpochId::INITIAL, TxId::new(2));
        for (name, age) in [("A", 1), ("B", 2), ("C", 3)] {
            store
                .create_node(view, p, vec![Value::from(name), Value::Int64(age)])
                .unwrap();
        }
        store.create_node(view, c, vec![Value::from("X")]).unwrap();
        store
    }

    fn explain(store: &GraphStore, query: &str) -> Vec<String> {
        let Statement::Query(q) = parse(query).unwrap() else {
            panic!("not a query");
        };
        let catalog = store.catalog();
        let params = Params::new();
        let bound = Binder::new(&catalog, &params).bind(&q).unwrap();
        Planner::new(&catalog, store).plan(bound).explain()
    }

    fn trimmed(lines: &[String]) -> Vec<&str> {
        lines.iter().map(|l| l.trim_start()).collect()
    }

    #[test]
    fn test_primary_key_lookup() {
        let store = store();
        let lines = explain(&store, "MATCH (p:Person {name: 'A'}) RETURN p.age");
        let ops = trimmed(&lines);
        assert!(ops[1].starts_with("NodeLookup (p:Person) key = "), "{lines:?}");
        assert!(!ops.iter().any(|l| l.starts_with("Filter")), "{lines:?}");
    }

    #[test]
    fn test_lookup_needs_matching_key_type() {
        let store = store();
        let lines = explain(&store, "MATCH (p:Person) WHERE p.name = 1 RETURN p");
        assert!(trimmed(&lines).iter().any(|l| l.starts_with("NodeScan")), "{lines:?}");
    }

    #[test]
    fn test_start_from_smaller_table() {
        let store = store();
        let lines = explain(&store, "MATCH (p:Person)-[:LivesIn]->(c:City) RETURN p.name");
        let ops = trimmed(&lines);
        assert_eq!(ops[1], "Expand #1 <- #0 [_:LivesIn]");
        assert_eq!(ops[2], "NodeScan (c:City) -> #1");
    }

    #[test]
    fn test_ties_start_leftmost() {
        let store = store();
        let lines = explain(&store, "MATCH (a:Person)-[:LivesIn]->(b:Person) RETURN a");
        let ops = trimmed(&lines);
        assert_eq!(ops[2], "NodeScan (a:Person) -> #0");
    }

    #[test]
    fn test_filter_pushdown() {
        let store = store();
        let lines = explain(
            &store,
            "MATCH (p:Person)-[:LivesIn]->(c:City) WHERE p.age > 1 AND c.name = p.name RETURN p",
        );
        let ops = trimmed(&lines);
        // City is smaller, so the scan starts there and the age filter sits
        // right above the expand that binds p, together with the join.
        assert_eq!(ops[0], "Project [#0]");
        assert!(ops[1].starts_with("Filter"), "{lines:?}");
        assert!(ops[2].starts_with("Expand"), "{lines:?}");
        assert!(ops[3].starts_with("NodeScan (c:City)"), "{lines:?}");
    }

    #[test]
    fn test_constant_false_is_empty() {
        let store = store();
        let lines = explain(&store, "MATCH (p:Person) WHERE 1 = 2 RETURN p");
        assert_eq!(trimmed(&lines), vec!["Project [#0]", "Empty"]);
    }

    #[test]
    fn test_cartesian_product_order() {
        let store = store();
        let lines = explain(&store, "MATCH (a:Person), (b:City) RETURN a, b");
        let ops = trimmed(&lines);
        assert_eq!(ops[1], "NodeScan (b:City) -> #1");
        assert_eq!(ops[2], "NodeScan (a:Person) -> #0");
    }

    #[test]
    fn test_aggregate_pipeline() {
        let store = store();
        let lines = explain(
            &store,
            "MATCH (p:Person) RETURN DISTINCT p.age AS age, count(*) AS n ORDER BY n DESC SKIP 1 LIMIT 2",
        );
        let names: Vec<&str> = trimmed(&lines)
            .into_iter()
            .map(|l| l.split(' ').next().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec!["SkipLimit", "Distinct", "Sort", "Project", "Aggregate", "NodeScan", "SingleRow"]
        );
    }

    #[test]
    fn test_write_plan() {
        let store = store();
        let Statement::Query(q) = parse("MATCH (p:Person) SET p.age = 5").unwrap() else {
            panic!("not a query");
        };
        let catalog = store.catalog();
        let params = Params::new();
        let bound = Binder::new(&catalog, &params).bind(&q).unwrap();
        let plan = Planner::new(&catalog, &store).plan(bound);
        assert!(plan.is_write);
        assert!(plan.columns.is_empty());
    }
}
