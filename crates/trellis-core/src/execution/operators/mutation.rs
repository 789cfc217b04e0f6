//! Write operators: `CREATE`, `SET` and `DELETE`.
//!
//! Each one drains its whole input before changing anything, so a write
//! can never feed back into the scan that drives it (a `MATCH ... CREATE`
//! over the same table terminates). The buffered rows are charged to the
//! buffer pool.

use std::collections::VecDeque;
use std::sync::Arc;

use trellis_common::memory::Reservation;
use trellis_common::types::{EdgeId, NodeId, PropertyKey, TableId, Value};

use super::scan::node_id;
use super::{BoxedOperator, Operator, OperatorError, OperatorResult, Row};
use crate::execution::{ExecutionContext, Expr};

const ROW_OVERHEAD: usize = 48;

fn drain_input(input: &mut BoxedOperator, memory: &mut Reservation) -> Result<Vec<Row>, OperatorError> {
    let mut rows = Vec::new();
    while let Some(row) = input.next()? {
        memory.grow(row.iter().map(Value::estimated_size).sum::<usize>() + ROW_OVERHEAD)?;
        rows.push(row);
    }
    Ok(rows)
}

fn release(memory: &mut Reservation) {
    let size = memory.size();
    memory.shrink(size);
}

/// Replaces every copy of node `id` in `row` with its current state.
fn refresh_node(ctx: &ExecutionContext, row: &mut Row, id: NodeId) {
    let fresh = ctx.store.node_value(id, ctx.view).unwrap_or(Value::Null);
    for value in row.iter_mut() {
        if matches!(value, Value::Node(n) if n.id == id) {
            *value = fresh.clone();
        }
    }
}

fn refresh_edge(ctx: &ExecutionContext, row: &mut Row, id: EdgeId) {
    let fresh = ctx.store.edge_value(id, ctx.view).unwrap_or(Value::Null);
    for value in row.iter_mut() {
        if matches!(value, Value::Rel(r) if r.id == id) {
            *value = fresh.clone();
        }
    }
}

/// One element of a `CREATE` pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateStep {
    Node {
        slot: usize,
        table: TableId,
        properties: Vec<(PropertyKey, Expr)>,
    },
    Edge {
        slot: Option<usize>,
        table: TableId,
        src_slot: usize,
        dst_slot: usize,
        properties: Vec<(PropertyKey, Expr)>,
    },
}

fn evaluate_properties(
    properties: &[(PropertyKey, Expr)],
    row: &[Value],
) -> Result<Vec<(PropertyKey, Value)>, OperatorError> {
    properties
        .iter()
        .map(|(k, e)| Ok((k.clone(), e.eval(row)?)))
        .collect()
}

pub struct CreateOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    steps: Vec<CreateStep>,
    output: Option<VecDeque<Row>>,
    memory: Reservation,
}

impl CreateOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, steps: Vec<CreateStep>) -> Self {
        let memory = ctx.pool.reservation();
        Self {
            input,
            ctx,
            steps,
            output: None,
            memory,
        }
    }

    fn apply(&self, row: &mut Row) -> Result<(), OperatorError> {
        let ctx = &self.ctx;
        for step in &self.steps {
            match step {
                CreateStep::Node { slot, table, properties } => {
                    let schema = ctx
                        .catalog
                        .table(*table)
                        .ok_or_else(|| OperatorError::Execution(format!("Node table {table} does not exist")))?;
                    let values = schema.build_row(evaluate_properties(properties, row)?)?;
                    let id = ctx.store.create_node(ctx.view, *table, values)?;
                    row[*slot] = ctx.store.node_value(id, ctx.view).unwrap_or(Value::Null);
                }
                CreateStep::Edge {
                    slot,
                    table,
                    src_slot,
                    dst_slot,
                    properties,
                } => {
                    let schema = ctx
                        .catalog
                        .table(*table)
                        .ok_or_else(|| OperatorError::Execution(format!("Rel table {table} does not exist")))?;
                    let (Some(src), Some(dst)) = (node_id(&row[*src_slot])?, node_id(&row[*dst_slot])?) else {
                        return Err(OperatorError::Execution(
                            "Cannot create a relationship with a NULL endpoint".into(),
                        ));
                    };
                    let values = schema.build_row(evaluate_properties(properties, row)?)?;
                    let id = ctx.store.create_edge(ctx.view, *table, src, dst, values)?;
                    if let Some(slot) = slot {
                        row[*slot] = ctx.store.edge_value(id, ctx.view).unwrap_or(Value::Null);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Operator for CreateOperator {
    fn next(&mut self) -> OperatorResult {
        if self.output.is_none() {
            let mut rows = drain_input(&mut self.input, &mut self.memory)?;
            for row in &mut rows {
                self.apply(row)?;
            }
            self.output = Some(rows.into());
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self) {
        self.input.reset();
        self.output = None;
        release(&mut self.memory);
    }

    fn name(&self) -> &'static str {
        "Create"
    }
}

/// `SET target.key = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub slot: usize,
    pub key: PropertyKey,
    pub value: Expr,
}

pub struct SetPropertyOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    items: Vec<SetItem>,
    output: Option<VecDeque<Row>>,
    memory: Reservation,
}

impl SetPropertyOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, items: Vec<SetItem>) -> Self {
        let memory = ctx.pool.reservation();
        Self {
            input,
            ctx,
            items,
            output: None,
            memory,
        }
    }

    fn column(&self, label: &str, key: &PropertyKey) -> Result<usize, OperatorError> {
        let schema = self
            .ctx
            .catalog
            .table_by_name(label)
            .ok_or_else(|| OperatorError::Execution(format!("Table {label} does not exist")))?;
        schema.property_index(key.as_str()).ok_or_else(|| {
            OperatorError::Execution(format!("Cannot set property {key}: table {label} has no such property"))
        })
    }

    fn apply(&self, row: &mut Row) -> Result<(), OperatorError> {
        let ctx = &self.ctx;
        for item in &self.items {
            let value = item.value.eval(row)?;
            match &row[item.slot] {
                Value::Null => {}
                Value::Node(n) => {
                    let id = n.id;
                    let column = self.column(&n.label, &item.key)?;
                    ctx.store.set_node_property(ctx.view, id, column, value)?;
                    refresh_node(ctx, row, id);
                }
                Value::Rel(r) => {
                    let id = r.id;
                    let column = self.column(&r.label, &item.key)?;
                    ctx.store.set_edge_property(ctx.view, id, column, value)?;
                    refresh_edge(ctx, row, id);
                }
                other => return Err(OperatorError::type_mismatch("NODE or REL", other)),
            }
        }
        Ok(())
    }
}

impl Operator for SetPropertyOperator {
    fn next(&mut self) -> OperatorResult {
        if self.output.is_none() {
            let mut rows = drain_input(&mut self.input, &mut self.memory)?;
            for row in &mut rows {
                self.apply(row)?;
            }
            self.output = Some(rows.into());
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self) {
        self.input.reset();
        self.output = None;
        release(&mut self.memory);
    }

    fn name(&self) -> &'static str {
        "SetProperty"
    }
}

/// `[DETACH] DELETE`. Relationships named in any row are removed before
/// any node, so `DELETE r, n` works whatever order the rows arrive in.
pub struct DeleteOperator {
    input: BoxedOperator,
    ctx: Arc<ExecutionContext>,
    slots: Vec<usize>,
    detach: bool,
    output: Option<VecDeque<Row>>,
    memory: Reservation,
}

impl DeleteOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, ctx: Arc<ExecutionContext>, slots: Vec<usize>, detach: bool) -> Self {
        let memory = ctx.pool.reservation();
        Self {
            input,
            ctx,
            slots,
            detach,
            output: None,
            memory,
        }
    }

    fn apply(&self, rows: &[Row]) -> Result<(), OperatorError> {
        let ctx = &self.ctx;
        let mut nodes = Vec::new();
        for row in rows {
            for &slot in &self.slots {
                match &row[slot] {
                    Value::Null => {}
                    Value::Rel(r) => {
                        ctx.store.delete_edge(ctx.view, r.id)?;
                    }
                    Value::Node(n) => nodes.push(n.id),
                    other => return Err(OperatorError::type_mismatch("NODE or REL", other)),
                }
            }
        }
        for id in nodes {
            ctx.store.delete_node(ctx.view, id, self.detach)?;
        }
        Ok(())
    }
}

impl Operator for DeleteOperator {
    fn next(&mut self) -> OperatorResult {
        if self.output.is_none() {
            let rows = drain_input(&mut self.input, &mut self.memory)?;
            self.apply(&rows)?;
            self.output = Some(rows.into());
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self) {
        self.input.reset();
        self.output = None;
        release(&mut self.memory);
    }

    fn name(&self) -> &'static str {
        "Delete"
    }
}
