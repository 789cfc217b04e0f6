//! Relationship traversal from a bound node.

use std::collections::VecDeque;
use std::sync::Arc;

use trellis_common::types::{EdgeId, NodeId, TableId, Value};

use super::scan::node_id;
use super::{BoxedOperator, Operator, OperatorResult, Row};
use crate::execution::ExecutionContext;
use crate::graph::{Direction, EdgeRecord, edge_to_value};

/// Where an expansion reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandSpec {
    pub from_slot: usize,
    pub edge_slot: Option<usize>,
    pub to_slot: usize,
    pub direction: Direction,
    /// Allowed rel tables; empty allows all.
    pub rel_tables: Vec<TableId>,
    /// Allowed target node tables; empty allows all.
    pub to_tables: Vec<TableId>,
    /// The target is already bound and only has to match.
    pub to_bound: bool,
}

/// For each input row, emits one row per matching relationship.
pub struct ExpandOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    spec: ExpandSpec,
    current: Option<(Row, NodeId)>,
    pending: VecDeque<(EdgeId, EdgeRecord)>,
}

impl ExpandOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, spec: ExpandSpec) -> Self {
        Self {
            input,
            ctx,
            spec,
            current: None,
            pending: VecDeque::new(),
        }
    }

    fn emit(&self, row: &Row, from: NodeId, id: EdgeId, edge: &EdgeRecord) -> Option<Row> {
        if !self.spec.rel_tables.is_empty() && !self.spec.rel_tables.contains(&edge.table) {
            return None;
        }
        let other = if edge.src == from { edge.dst } else { edge.src };
        if self.spec.to_bound {
            return match &row[self.spec.to_slot] {
                Value::Node(n) if n.id == other => self.with_edge(row.clone(), id, edge),
                _ => None,
            };
        }
        let target = self.ctx.store.node_value(other, self.ctx.view)?;
        if !self.spec.to_tables.is_empty() {
            let table = self.ctx.catalog.table_by_name(target.as_node()?.label.as_str())?.id;
            if !self.spec.to_tables.contains(&table) {
                return None;
            }
        }
        let mut out = row.clone();
        out[self.spec.to_slot] = target;
        self.with_edge(out, id, edge)
    }

    fn with_edge(&self, mut row: Row, id: EdgeId, edge: &EdgeRecord) -> Option<Row> {
        if let Some(slot) = self.spec.edge_slot {
            row[slot] = edge_to_value(&self.ctx.catalog, id, edge)?;
        }
        Some(row)
    }
}

impl Operator for ExpandOperator {
    fn next(&mut self) -> OperatorResult {
        loop {
            if let Some((row, from)) = &self.current {
                while let Some((id, edge)) = self.pending.pop_front() {
                    if let Some(out) = self.emit(row, *from, id, &edge) {
                        return Ok(Some(out));
                    }
                }
                self.current = None;
            }
            let Some(row) = self.input.next()? else {
                return Ok(None);
            };
            let Some(from) = node_id(&row[self.spec.from_slot])? else {
                continue;
            };
            self.ctx.check_deadline()?;
            self.pending = self
                .ctx
                .store
                .edges_of(from, self.spec.direction, self.ctx.view)
                .into();
            self.current = Some((row, from));
        }
    }

    fn reset(&mut self) {
        self.input.reset();
        self.current = None;
        self.pending.clear();
    }

    fn name(&self) -> &'static str {
        "Expand"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::test_support::drain;
    use crate::execution::operators::{NodeScanOperator, SingleRowOperator};
    use crate::execution::Expr;
    use crate::graph::{GraphStore, PropertyDef, TableSchema, TxView};
    use trellis_common::memory::BufferPool;
    use trellis_common::types::{EpochId, LogicalType, TxId};

    struct Fixture {
        ctx: Arc<ExecutionContext>,
        person: TableId,
        knows: TableId,
    }

    /// a -> b, a -> c, c -> a
    fn fixture() -> Fixture {
        let store = Arc::new(GraphStore::new());
        let person = TableSchema::node("P", vec![PropertyDef::new("name", LogicalType::String)], "name").unwrap();
        store.create_table(person).unwrap();
        let person = store.catalog().node_table("P").unwrap().id;
        store.create_table(TableSchema::rel("K", person, person, vec![]).unwrap()).unwrap();
        let knows = store.catalog().rel_table("K").unwrap().id;

        let view = TxView::new(EpochId::INITIAL, TxId(2));
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| store.create_node(view, person, vec![Value::from(*n)]).unwrap())
            .collect();
        for (s, d) in [(0, 1), (0, 2), (2, 0)] {
            store.create_edge(view, knows, ids[s], ids[d], vec![]).unwrap();
        }
        store.commit(TxId(2), EpochId::new(1));
        let ctx = ExecutionContext::new(store, TxView::read_only(EpochId::new(1)), BufferPool::new(1 << 20));
        Fixture {
            ctx: Arc::new(ctx),
            person,
            knows,
        }
    }

    fn names(rows: &[Row], slot: usize) -> Vec<String> {
        rows.iter()
            .map(|r| Expr::property(Expr::Column(slot), "name").eval(r).unwrap().to_string())
            .collect()
    }

    fn expand_from_all(f: &Fixture, direction: Direction) -> Vec<Row> {
        let scan = NodeScanOperator::new(Box::new(SingleRowOperator::new(3)), Arc::clone(&f.ctx), vec![f.person], 0);
        let spec = ExpandSpec {
            from_slot: 0,
            edge_slot: Some(1),
            to_slot: 2,
            direction,
            rel_tables: vec![f.knows],
            to_tables: vec![],
            to_bound: false,
        };
        let mut op = ExpandOperator::new(Box::new(scan), Arc::clone(&f.ctx), spec);
        drain(&mut op)
    }

    #[test]
    fn test_outgoing() {
        let f = fixture();
        let rows = expand_from_all(&f, Direction::Outgoing);
        assert_eq!(names(&rows, 0), ["a", "a", "c"]);
        assert_eq!(names(&rows, 2), ["b", "c", "a"]);
        assert!(matches!(rows[0][1], Value::Rel(_)));
    }

    #[test]
    fn test_incoming_and_both() {
        let f = fixture();
        assert_eq!(expand_from_all(&f, Direction::Incoming).len(), 3);
        assert_eq!(expand_from_all(&f, Direction::Both).len(), 6);
    }

    #[test]
    fn test_bound_target_closes_cycle() {
        let f = fixture();
        let first = NodeScanOperator::new(Box::new(SingleRowOperator::new(3)), Arc::clone(&f.ctx), vec![f.person], 0);
        let second = NodeScanOperator::new(Box::new(first), Arc::clone(&f.ctx), vec![f.person], 2);
        let spec = ExpandSpec {
            from_slot: 0,
            edge_slot: None,
            to_slot: 2,
            direction: Direction::Outgoing,
            rel_tables: vec![],
            to_tables: vec![],
            to_bound: true,
        };
        let mut op = ExpandOperator::new(Box::new(second), Arc::clone(&f.ctx), spec);
        assert_eq!(drain(&mut op).len(), 3);
    }
}
