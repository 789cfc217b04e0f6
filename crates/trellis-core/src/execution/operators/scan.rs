//! Operators that introduce nodes: full table scans and primary-key
//! lookups. Both run once per input row, so a second `MATCH` pattern
//! becomes a nested loop over the first.

use std::collections::VecDeque;
use std::sync::Arc;

use trellis_common::types::{NodeId, TableId, Value};

use super::{BoxedOperator, Operator, OperatorResult, Row};
use crate::execution::{ExecutionContext, Expr};

/// Node ids fetched from the store per call.
const SCAN_BATCH: usize = 1024;

/// Emits each input row once per visible node of `tables`, with the node in
/// `slot`. Tables are scanned in the given order, nodes by ascending id.
pub struct NodeScanOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    tables: Vec<TableId>,
    slot: usize,
    current: Option<Row>,
    table_pos: usize,
    after: Option<NodeId>,
    batch: VecDeque<NodeId>,
}

impl NodeScanOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, tables: Vec<TableId>, slot: usize) -> Self {
        Self {
            input,
            ctx,
            tables,
            slot,
            current: None,
            table_pos: 0,
            after: None,
            batch: VecDeque::new(),
        }
    }
}

impl Operator for NodeScanOperator {
    fn next(&mut self) -> OperatorResult {
        loop {
            if let Some(row) = &self.current {
                while let Some(id) = self.batch.pop_front() {
                    // A node deleted by this transaction since the batch was read is skipped.
                    if let Some(node) = self.ctx.store.node_value(id, self.ctx.view) {
                        let mut out = row.clone();
                        out[self.slot] = node;
                        return Ok(Some(out));
                    }
                }
                let Some(&table) = self.tables.get(self.table_pos) else {
                    self.current = None;
                    continue;
                };
                self.ctx.check_deadline()?;
                let ids = self.ctx.store.scan_nodes(table, self.after, SCAN_BATCH, self.ctx.view);
                match ids.last() {
                    Some(last) => {
                        self.after = Some(*last);
                        self.batch.extend(ids);
                    }
                    None => {
                        self.table_pos += 1;
                        self.after = None;
                    }
                }
                continue;
            }
            let Some(row) = self.input.next()? else {
                return Ok(None);
            };
            self.current = Some(row);
            self.table_pos = 0;
            self.after = None;
        }
    }

    fn reset(&mut self) {
        self.input.reset();
        self.current = None;
        self.table_pos = 0;
        self.after = None;
        self.batch.clear();
    }

    fn name(&self) -> &'static str {
        "NodeScan"
    }
}

/// Finds at most one node per input row by primary key.
pub struct NodeLookupOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    table: TableId,
    key: Expr,
    slot: usize,
}

impl NodeLookupOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, table: TableId, key: Expr, slot: usize) -> Self {
        Self {
            input,
            ctx,
            table,
            key,
            slot,
        }
    }
}

impl Operator for NodeLookupOperator {
    fn next(&mut self) -> OperatorResult {
        while let Some(mut row) = self.input.next()? {
            self.ctx.check_deadline()?;
            let key = self.key.eval(&row)?;
            if key.is_null() {
                continue;
            }
            let found = self
                .ctx
                .store
                .lookup_primary_key(self.table, &key, self.ctx.view)
                .and_then(|id| self.ctx.store.node_value(id, self.ctx.view));
            if let Some(node) = found {
                row[self.slot] = node;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.input.reset();
    }

    fn name(&self) -> &'static str {
        "NodeLookup"
    }
}

pub(crate) fn node_id(value: &Value) -> Result<Option<NodeId>, super::OperatorError> {
    match value {
        Value::Null => Ok(None),
        Value::Node(n) => Ok(Some(n.id)),
        other => Err(super::OperatorError::type_mismatch("NODE", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::SingleRowOperator;
    use crate::execution::operators::test_support::drain;
    use crate::graph::{GraphStore, PropertyDef, TableSchema, TxView};
    use trellis_common::memory::BufferPool;
    use trellis_common::types::{EpochId, LogicalType, TxId};

    fn populated(n: i64) -> (Arc<ExecutionContext>, TableId) {
        let store = Arc::new(GraphStore::new());
        let schema = TableSchema::node("Item", vec![PropertyDef::new("k", LogicalType::Int64)], "k").unwrap();
        store.create_table(schema).unwrap();
        let table = store.catalog().node_table("Item").unwrap().id;
        let tx = TxId(2);
        for k in 0..n {
            store
                .create_node(TxView::new(EpochId::INITIAL, tx), table, vec![Value::Int64(k)])
                .unwrap();
        }
        store.commit(tx, EpochId::new(1));
        let ctx = ExecutionContext::new(store, TxView::read_only(EpochId::new(1)), BufferPool::new(1 << 20));
        (Arc::new(ctx), table)
    }

    #[test]
    fn test_scan_crosses_batches() {
        let (ctx, table) = populated(SCAN_BATCH as i64 + 5);
        let mut op = NodeScanOperator::new(Box::new(SingleRowOperator::new(1)), ctx, vec![table], 0);
        let rows = drain(&mut op);
        assert_eq!(rows.len(), SCAN_BATCH + 5);
        assert_eq!(Expr::property(Expr::Column(0), "k").eval(&rows[3]).unwrap(), Value::Int64(3));
    }

    #[test]
    fn test_scan_is_a_nested_loop() {
        let (ctx, table) = populated(3);
        let inner = NodeScanOperator::new(Box::new(SingleRowOperator::new(2)), Arc::clone(&ctx), vec![table], 0);
        let mut outer = NodeScanOperator::new(Box::new(inner), ctx, vec![table], 1);
        assert_eq!(drain(&mut outer).len(), 9);
    }

    #[test]
    fn test_lookup() {
        let (ctx, table) = populated(10);
        let mut op = NodeLookupOperator::new(
            Box::new(SingleRowOperator::new(1)),
            ctx,
            table,
            Expr::Literal(Value::Int64(7)),
            0,
        );
        let rows = drain(&mut op);
        assert_eq!(rows.len(), 1);
        assert_eq!(Expr::property(Expr::Column(0), "k").eval(&rows[0]).unwrap(), Value::Int64(7));
    }

    #[test]
    fn test_timeout_during_scan() {
        let (ctx, table) = populated(1);
        let ctx = Arc::new(
            ExecutionContext::new(Arc::clone(&ctx.store), ctx.view, BufferPool::new(1024))
                .with_timeout(Some(std::time::Duration::ZERO)),
        );
        let mut op = NodeScanOperator::new(Box::new(SingleRowOperator::new(1)), ctx, vec![table], 0);
        assert!(matches!(op.next(), Err(super::super::OperatorError::Timeout(_))));
    }
}
