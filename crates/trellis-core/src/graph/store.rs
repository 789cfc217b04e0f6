//! The versioned graph store.
//!
//! Nodes and relationships live in version chains keyed by id, grouped per
//! table in ordered sets so scans are deterministic. Forward and backward
//! adjacency lists make expansion O(degree), and a per-table primary-key
//! index turns key equality into a lookup.
//!
//! Every write is tagged with the writing transaction and stays invisible to
//! everybody else until [`GraphStore::commit`] stamps it with a commit epoch.
//! The store never publishes epochs itself; the transaction manager decides
//! which epoch a new snapshot reads at.
//!
//! Lock order is catalog, then data, then pending. No method acquires the
//! catalog while holding the data lock.

use arcstr::ArcStr;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_common::mvcc::VersionChain;
use trellis_common::types::{
    EdgeId, EpochId, HashableValue, NodeId, NodeValue, PropertyKey, RelValue, TableId, TxId, Value,
};
use trellis_common::utils::error::{Error, Result, TransactionError};
use trellis_common::utils::hash::{FxHashMap, fx_map};

use super::{Catalog, Direction, Mutation, TableKind, TableSchema};

/// The transaction used for data loaded from a snapshot or the WAL.
const SYSTEM_TX: TxId = TxId(1);

/// The epoch a view reads at plus the transaction it writes as.
///
/// Read-only auto-commit queries use [`TxId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxView {
    pub epoch: EpochId,
    pub tx: TxId,
}

impl TxView {
    #[must_use]
    pub const fn new(epoch: EpochId, tx: TxId) -> Self {
        Self { epoch, tx }
    }

    #[must_use]
    pub const fn read_only(epoch: EpochId) -> Self {
        Self {
            epoch,
            tx: TxId::INVALID,
        }
    }

    /// The newest committed state plus this transaction's own changes.
    const fn latest(self) -> Self {
        Self {
            epoch: EpochId(u64::MAX - 1),
            tx: self.tx,
        }
    }

    fn writer(self) -> Result<TxId> {
        if self.tx.is_valid() {
            Ok(self.tx)
        } else {
            Err(Error::Internal("write attempted without a transaction".into()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub table: TableId,
    pub properties: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub table: TableId,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: Vec<Value>,
}

/// Committed contents of a store, as written by a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub catalog: Catalog,
    pub nodes: Vec<(NodeId, NodeRecord)>,
    pub edges: Vec<(EdgeId, EdgeRecord)>,
    pub next_node_id: u64,
    pub next_edge_id: u64,
}

/// Counts visible to one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub table_count: usize,
}

type KeyIndex = FxHashMap<HashableValue, SmallVec<[NodeId; 1]>>;

#[derive(Default)]
struct GraphData {
    nodes: FxHashMap<NodeId, VersionChain<NodeRecord>>,
    edges: FxHashMap<EdgeId, VersionChain<EdgeRecord>>,
    table_nodes: FxHashMap<TableId, BTreeSet<NodeId>>,
    table_edges: FxHashMap<TableId, BTreeSet<EdgeId>>,
    outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    primary_keys: FxHashMap<TableId, KeyIndex>,
}

impl GraphData {
    fn node_visible(&self, id: NodeId, view: TxView) -> Option<&NodeRecord> {
        self.nodes.get(&id)?.visible_to(view.epoch, view.tx)
    }

    fn edge_visible(&self, id: EdgeId, view: TxView) -> Option<&EdgeRecord> {
        self.edges.get(&id)?.visible_to(view.epoch, view.tx)
    }

    fn visible_edges(&self, node: NodeId, direction: Direction, view: TxView) -> Vec<(EdgeId, EdgeRecord)> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for &id in self.outgoing.get(&node).into_iter().flatten() {
                if let Some(edge) = self.edge_visible(id, view) {
                    out.push((id, edge.clone()));
                }
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for &id in self.incoming.get(&node).into_iter().flatten() {
                if let Some(edge) = self.edge_visible(id, view) {
                    // Self-loops were already reported as outgoing.
                    if direction == Direction::Both && edge.src == edge.dst {
                        continue;
                    }
                    out.push((id, edge.clone()));
                }
            }
        }
        out
    }

    fn key_taken(&self, table: TableId, key: &HashableValue, view: TxView) -> bool {
        let latest = view.latest();
        self.primary_keys
            .get(&table)
            .and_then(|index| index.get(key))
            .is_some_and(|ids| ids.iter().any(|id| self.node_visible(*id, latest).is_some()))
    }

    fn link_node(&mut self, id: NodeId, record: &NodeRecord, pk: Option<usize>) {
        self.table_nodes.entry(record.table).or_default().insert(id);
        if let Some(pk) = pk {
            let key = HashableValue::new(record.properties[pk].clone());
            self.primary_keys
                .entry(record.table)
                .or_insert_with(fx_map)
                .entry(key)
                .or_default()
                .push(id);
        }
    }

    /// Drops every trace of a node whose version chain became empty.
    fn unlink_node(&mut self, id: NodeId, record: &NodeRecord, pk: Option<usize>) {
        self.nodes.remove(&id);
        if let Some(set) = self.table_nodes.get_mut(&record.table) {
            set.remove(&id);
        }
        if let Some(pk) = pk
            && let Some(index) = self.primary_keys.get_mut(&record.table)
        {
            let key = HashableValue::new(record.properties[pk].clone());
            if let Some(ids) = index.get_mut(&key) {
                ids.retain(|n| *n != id);
                if ids.is_empty() {
                    index.remove(&key);
                }
            }
        }
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
    }

    fn link_edge(&mut self, id: EdgeId, record: &EdgeRecord) {
        self.table_edges.entry(record.table).or_default().insert(id);
        self.outgoing.entry(record.src).or_default().push(id);
        self.incoming.entry(record.dst).or_default().push(id);
    }

    fn unlink_edge(&mut self, id: EdgeId, record: &EdgeRecord) {
        self.edges.remove(&id);
        if let Some(set) = self.table_edges.get_mut(&record.table) {
            set.remove(&id);
        }
        if let Some(list) = self.outgoing.get_mut(&record.src) {
            list.retain(|e| *e != id);
        }
        if let Some(list) = self.incoming.get_mut(&record.dst) {
            list.retain(|e| *e != id);
        }
    }
}

/// Changes one transaction has made so far.
#[derive(Default)]
struct TxWrites {
    nodes: BTreeSet<NodeId>,
    edges: BTreeSet<EdgeId>,
    mutations: Vec<Mutation>,
}

/// The graph store shared by every session of a database.
pub struct GraphStore {
    catalog: RwLock<Arc<Catalog>>,
    data: RwLock<GraphData>,
    pending: Mutex<FxHashMap<TxId, TxWrites>>,
    next_node_id: AtomicU64,
    next_edge_id: AtomicU64,
}

impl GraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Arc::new(Catalog::new())),
            data: RwLock::new(GraphData::default()),
            pending: Mutex::new(fx_map()),
            next_node_id: AtomicU64::new(0),
            next_edge_id: AtomicU64::new(0),
        }
    }

    /// Rebuilds a store from checkpointed contents. Everything loaded is
    /// visible to every snapshot.
    ///
    /// # Errors
    ///
    /// Fails if a record references a table or node the snapshot lacks.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let store = Self::new();
        *store.catalog.write() = Arc::new(snapshot.catalog);
        {
            let catalog = store.catalog();
            let mut data = store.data.write();
            for (id, record) in snapshot.nodes {
                let table = catalog.table(record.table).ok_or_else(|| {
                    Error::Serialization(format!("node {id} references unknown table {}", record.table))
                })?;
                data.link_node(id, &record, table.primary_key_index());
                data.nodes
                    .insert(id, VersionChain::with_initial(record, EpochId::INITIAL, SYSTEM_TX));
            }
            for (id, record) in snapshot.edges {
                if !data.nodes.contains_key(&record.src) || !data.nodes.contains_key(&record.dst) {
                    return Err(Error::Serialization(format!("edge {id} references a missing node")));
                }
                data.link_edge(id, &record);
                data.edges
                    .insert(id, VersionChain::with_initial(record, EpochId::INITIAL, SYSTEM_TX));
            }
        }
        store.next_node_id.store(snapshot.next_node_id, Ordering::Release);
        store.next_edge_id.store(snapshot.next_edge_id, Ordering::Release);
        Ok(store)
    }

    /// Captures everything committed at or before `epoch`.
    #[must_use]
    pub fn snapshot(&self, epoch: EpochId) -> StoreSnapshot {
        let catalog = self.catalog();
        let data = self.data.read();
        let view = TxView::read_only(epoch);

        let mut nodes: Vec<_> = data
            .nodes
            .iter()
            .filter_map(|(id, chain)| chain.visible_at(view.epoch).map(|r| (*id, r.clone())))
            .collect();
        nodes.sort_by_key(|(id, _)| *id);
        let mut edges: Vec<_> = data
            .edges
            .iter()
            .filter_map(|(id, chain)| chain.visible_at(view.epoch).map(|r| (*id, r.clone())))
            .collect();
        edges.sort_by_key(|(id, _)| *id);

        StoreSnapshot {
            catalog: (*catalog).clone(),
            nodes,
            edges,
            next_node_id: self.next_node_id.load(Ordering::Acquire),
            next_edge_id: self.next_edge_id.load(Ordering::Acquire),
        }
    }

    // === Catalog ===

    /// The current catalog. Cheap; callers keep the `Arc` for a whole query.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read())
    }

    /// Adds a table and returns the mutation to log.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the schema is inconsistent.
    pub fn create_table(&self, schema: TableSchema) -> Result<Mutation> {
        let mut guard = self.catalog.write();
        let (next, id) = guard.with_table(schema)?;
        let created = next
            .table(id)
            .map(|t| (**t).clone())
            .ok_or_else(|| Error::Internal(format!("table {id} vanished after creation")))?;
        *guard = Arc::new(next);
        tracing::debug!(table = %created.name, id = %id, "created table");
        Ok(Mutation::CreateTable(created))
    }

    /// Drops a table together with all of its rows.
    ///
    /// Rows are removed physically: dropping is not versioned, so readers
    /// still scanning the table see it empty from now on.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown or still referenced by a rel table.
    pub fn drop_table(&self, table: TableId) -> Result<Mutation> {
        let mut guard = self.catalog.write();
        let next = guard.without_table(table)?;
        let mut data = self.data.write();
        if let Some(ids) = data.table_edges.remove(&table) {
            for id in ids {
                if let Some(record) = data.edges.get(&id).and_then(VersionChain::latest).cloned() {
                    data.unlink_edge(id, &record);
                }
            }
        }
        if let Some(ids) = data.table_nodes.remove(&table) {
            for id in ids {
                data.nodes.remove(&id);
                data.outgoing.remove(&id);
                data.incoming.remove(&id);
            }
        }
        data.primary_keys.remove(&table);
        drop(data);
        *guard = Arc::new(next);
        tracing::debug!(id = %table, "dropped table");
        Ok(Mutation::DropTable { table })
    }

    // === Reads ===

    /// Up to `limit` visible node ids of `table` greater than `after`, in
    /// ascending id order.
    #[must_use]
    pub fn scan_nodes(&self, table: TableId, after: Option<NodeId>, limit: usize, view: TxView) -> Vec<NodeId> {
        let data = self.data.read();
        let Some(set) = data.table_nodes.get(&table) else {
            return Vec::new();
        };
        let range = match after {
            Some(after) => set.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)),
            None => set.range(..),
        };
        range
            .filter(|id| data.node_visible(**id, view).is_some())
            .take(limit)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn node(&self, id: NodeId, view: TxView) -> Option<NodeRecord> {
        self.data.read().node_visible(id, view).cloned()
    }

    #[must_use]
    pub fn edge(&self, id: EdgeId, view: TxView) -> Option<EdgeRecord> {
        self.data.read().edge_visible(id, view).cloned()
    }

    /// The node as a result value, or `None` if it is not visible.
    #[must_use]
    pub fn node_value(&self, id: NodeId, view: TxView) -> Option<Value> {
        let catalog = self.catalog();
        let record = self.node(id, view)?;
        node_to_value(&catalog, id, &record)
    }

    /// The relationship as a result value, or `None` if it is not visible.
    #[must_use]
    pub fn edge_value(&self, id: EdgeId, view: TxView) -> Option<Value> {
        let catalog = self.catalog();
        let record = self.edge(id, view)?;
        edge_to_value(&catalog, id, &record)
    }

    /// Finds the node of `table` whose primary key equals `key`.
    #[must_use]
    pub fn lookup_primary_key(&self, table: TableId, key: &Value, view: TxView) -> Option<NodeId> {
        let data = self.data.read();
        let index = data.primary_keys.get(&table)?;
        let key = HashableValue::new(key.clone());
        index
            .get(&key)?
            .iter()
            .copied()
            .find(|id| data.node_visible(*id, view).is_some())
    }

    /// Visible relationships touching `node`, outgoing before incoming, each
    /// group in creation order.
    #[must_use]
    pub fn edges_of(&self, node: NodeId, direction: Direction, view: TxView) -> Vec<(EdgeId, EdgeRecord)> {
        self.data.read().visible_edges(node, direction, view)
    }

    /// Number of rows tracked for `table`, including not-yet-vacuumed
    /// versions. Used as a planning statistic only.
    #[must_use]
    pub fn table_cardinality(&self, table: TableId) -> usize {
        let data = self.data.read();
        data.table_nodes
            .get(&table)
            .map(BTreeSet::len)
            .or_else(|| data.table_edges.get(&table).map(BTreeSet::len))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self, view: TxView) -> StoreStats {
        let table_count = self.catalog().len();
        let data = self.data.read();
        StoreStats {
            node_count: data
                .nodes
                .values()
                .filter(|c| c.visible_to(view.epoch, view.tx).is_some())
                .count(),
            edge_count: data
                .edges
                .values()
                .filter(|c| c.visible_to(view.epoch, view.tx).is_some())
                .count(),
            table_count,
        }
    }

    // === Writes ===

    /// Inserts a node with a schema-ordered property row.
    ///
    /// # Errors
    ///
    /// Fails on an unknown table, a row of the wrong width, or a duplicate
    /// primary key.
    pub fn create_node(&self, view: TxView, table: TableId, properties: Vec<Value>) -> Result<NodeId> {
        let id = NodeId::new(self.next_node_id.fetch_add(1, Ordering::AcqRel));
        self.insert_node(view, id, table, properties)?;
        Ok(id)
    }

    fn insert_node(&self, view: TxView, id: NodeId, table: TableId, properties: Vec<Value>) -> Result<()> {
        let tx = view.writer()?;
        let catalog = self.catalog();
        let schema = node_schema(&catalog, table)?;
        if properties.len() != schema.properties.len() {
            return Err(Error::Internal(format!(
                "row for {} has {} values, expected {}",
                schema.name,
                properties.len(),
                schema.properties.len()
            )));
        }
        let pk = schema.primary_key_index();

        let mut data = self.data.write();
        if let Some(pk) = pk {
            let key = HashableValue::new(properties[pk].clone());
            if data.key_taken(table, &key, view) {
                return Err(Error::execution(format!(
                    "Found duplicated primary key value {} in table {}, which violates the uniqueness constraint",
                    properties[pk], schema.name
                )));
            }
        }
        let record = NodeRecord {
            table,
            properties: properties.clone(),
        };
        data.link_node(id, &record, pk);
        data.nodes
            .insert(id, VersionChain::with_initial(record, EpochId::PENDING, tx));
        drop(data);

        self.record(tx, |w| {
            w.nodes.insert(id);
            w.mutations.push(Mutation::CreateNode { id, table, properties });
        });
        Ok(())
    }

    /// Overwrites one property column of a visible node.
    ///
    /// # Errors
    ///
    /// Fails if the node is gone, the column is the primary key, the value
    /// does not fit the column, or the node changed after this snapshot.
    pub fn set_node_property(&self, view: TxView, id: NodeId, column: usize, value: Value) -> Result<()> {
        let tx = view.writer()?;
        let catalog = self.catalog();
        let mut data = self.data.write();
        let table = data
            .node_visible(id, view)
            .map(|r| r.table)
            .ok_or_else(|| Error::execution(format!("Node {id} does not exist")))?;
        let schema = node_schema(&catalog, table)?;
        if column >= schema.properties.len() {
            return Err(Error::Internal(format!("column {column} out of range for {}", schema.name)));
        }
        if schema.primary_key_index() == Some(column) {
            return Err(Error::execution(format!(
                "Cannot update primary key {} of table {}",
                schema.properties[column].name, schema.name
            )));
        }
        let value = schema.coerce(column, value)?;
        let chain = data
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::execution(format!("Node {id} does not exist")))?;
        check_conflict(chain.has_conflict(view.epoch, tx), "node", id)?;
        if let Some(record) = chain.get_mut(view.epoch, tx) {
            record.properties[column] = value.clone();
        }
        drop(data);

        self.record(tx, |w| {
            w.nodes.insert(id);
            w.mutations.push(Mutation::SetNodeProperty {
                id,
                column: column as u32,
                value,
            });
        });
        Ok(())
    }

    /// Deletes a visible node. With `detach`, its relationships go too;
    /// without it, a node that still has relationships is an error.
    ///
    /// Returns `false` if the node was already invisible.
    ///
    /// # Errors
    ///
    /// Fails on attached relationships without `detach` and on conflicts.
    pub fn delete_node(&self, view: TxView, id: NodeId, detach: bool) -> Result<bool> {
        let tx = view.writer()?;
        let attached: Vec<EdgeId> = {
            let data = self.data.read();
            if data.node_visible(id, view).is_none() {
                return Ok(false);
            }
            data.visible_edges(id, Direction::Both, view)
                .into_iter()
                .map(|(e, _)| e)
                .collect()
        };
        if !attached.is_empty() && !detach {
            return Err(Error::execution(format!(
                "Node {id} still has {} relationship(s); use DETACH DELETE to remove them",
                attached.len()
            )));
        }
        for edge in attached {
            self.delete_edge(view, edge)?;
        }

        let mut data = self.data.write();
        let Some(chain) = data.nodes.get_mut(&id) else {
            return Ok(false);
        };
        check_conflict(chain.has_conflict(view.epoch, tx), "node", id)?;
        if !chain.mark_deleted(view.epoch, tx) {
            return Ok(false);
        }
        drop(data);

        self.record(tx, |w| {
            w.nodes.insert(id);
            w.mutations.push(Mutation::DeleteNode { id });
        });
        Ok(true)
    }

    /// Inserts a relationship of rel table `table` from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// Fails if an endpoint is invisible or lives in the wrong node table.
    pub fn create_edge(
        &self,
        view: TxView,
        table: TableId,
        src: NodeId,
        dst: NodeId,
        properties: Vec<Value>,
    ) -> Result<EdgeId> {
        let id = EdgeId::new(self.next_edge_id.fetch_add(1, Ordering::AcqRel));
        self.insert_edge(view, id, table, src, dst, properties)?;
        Ok(id)
    }

    fn insert_edge(
        &self,
        view: TxView,
        id: EdgeId,
        table: TableId,
        src: NodeId,
        dst: NodeId,
        properties: Vec<Value>,
    ) -> Result<()> {
        let tx = view.writer()?;
        let catalog = self.catalog();
        let schema = catalog
            .table(table)
            .filter(|t| t.is_rel())
            .ok_or_else(|| Error::execution(format!("Rel table {table} does not exist")))?;
        let TableKind::Rel { from, to } = schema.kind else {
            return Err(Error::Internal(format!("table {} is not a rel table", schema.name)));
        };
        if properties.len() != schema.properties.len() {
            return Err(Error::Internal(format!("row for {} has the wrong width", schema.name)));
        }

        let mut data = self.data.write();
        for (end, expected) in [(src, from), (dst, to)] {
            let actual = data
                .node_visible(end, view)
                .map(|r| r.table)
                .ok_or_else(|| Error::execution(format!("Node {end} does not exist")))?;
            if actual != expected {
                let expected_name = catalog.table(expected).map_or("?", |t| t.name.as_str());
                return Err(Error::execution(format!(
                    "Rel table {} connects {} nodes, node {end} is not one",
                    schema.name, expected_name
                )));
            }
        }
        let record = EdgeRecord {
            table,
            src,
            dst,
            properties: properties.clone(),
        };
        data.link_edge(id, &record);
        data.edges
            .insert(id, VersionChain::with_initial(record, EpochId::PENDING, tx));
        drop(data);

        self.record(tx, |w| {
            w.edges.insert(id);
            w.mutations.push(Mutation::CreateEdge {
                id,
                table,
                src,
                dst,
                properties,
            });
        });
        Ok(())
    }

    /// Overwrites one property column of a visible relationship.
    ///
    /// # Errors
    ///
    /// Fails if the relationship is gone, the value does not fit, or it
    /// changed after this snapshot.
    pub fn set_edge_property(&self, view: TxView, id: EdgeId, column: usize, value: Value) -> Result<()> {
        let tx = view.writer()?;
        let catalog = self.catalog();
        let mut data = self.data.write();
        let table = data
            .edge_visible(id, view)
            .map(|r| r.table)
            .ok_or_else(|| Error::execution(format!("Relationship {id} does not exist")))?;
        let schema = catalog
            .table(table)
            .ok_or_else(|| Error::execution(format!("Rel table {table} does not exist")))?;
        if column >= schema.properties.len() {
            return Err(Error::Internal(format!("column {column} out of range for {}", schema.name)));
        }
        let value = schema.coerce(column, value)?;
        let chain = data
            .edges
            .get_mut(&id)
            .ok_or_else(|| Error::execution(format!("Relationship {id} does not exist")))?;
        check_conflict(chain.has_conflict(view.epoch, tx), "relationship", id)?;
        if let Some(record) = chain.get_mut(view.epoch, tx) {
            record.properties[column] = value.clone();
        }
        drop(data);

        self.record(tx, |w| {
            w.edges.insert(id);
            w.mutations.push(Mutation::SetEdgeProperty {
                id,
                column: column as u32,
                value,
            });
        });
        Ok(())
    }

    /// Deletes a visible relationship. Returns `false` if it was invisible.
    ///
    /// # Errors
    ///
    /// Fails if the relationship changed after this snapshot.
    pub fn delete_edge(&self, view: TxView, id: EdgeId) -> Result<bool> {
        let tx = view.writer()?;
        let mut data = self.data.write();
        let Some(chain) = data.edges.get_mut(&id) else {
            return Ok(false);
        };
        if chain.visible_to(view.epoch, tx).is_none() {
            return Ok(false);
        }
        check_conflict(chain.has_conflict(view.epoch, tx), "relationship", id)?;
        chain.mark_deleted(view.epoch, tx);
        drop(data);

        self.record(tx, |w| {
            w.edges.insert(id);
            w.mutations.push(Mutation::DeleteEdge { id });
        });
        Ok(true)
    }

    fn record(&self, tx: TxId, f: impl FnOnce(&mut TxWrites)) {
        f(self.pending.lock().entry(tx).or_default());
    }

    // === Transaction lifecycle ===

    /// Whether `tx` has changed anything.
    #[must_use]
    pub fn has_writes(&self, tx: TxId) -> bool {
        self.pending
            .lock()
            .get(&tx)
            .is_some_and(|w| !w.mutations.is_empty())
    }

    /// The changes `tx` would commit, in execution order.
    #[must_use]
    pub fn mutations(&self, tx: TxId) -> Vec<Mutation> {
        self.pending
            .lock()
            .get(&tx)
            .map(|w| w.mutations.clone())
            .unwrap_or_default()
    }

    /// Stamps every change of `tx` with `epoch`.
    ///
    /// The changes become visible to snapshots at `epoch` or later; callers
    /// publish the epoch only after this returns.
    pub fn commit(&self, tx: TxId, epoch: EpochId) {
        let Some(writes) = self.pending.lock().remove(&tx) else {
            return;
        };
        let mut data = self.data.write();
        for id in &writes.nodes {
            if let Some(chain) = data.nodes.get_mut(id) {
                chain.finalize(tx, epoch);
            }
        }
        for id in &writes.edges {
            if let Some(chain) = data.edges.get_mut(id) {
                chain.finalize(tx, epoch);
            }
        }
        tracing::trace!(tx = %tx, epoch = %epoch, changes = writes.mutations.len(), "finalized");
    }

    /// Discards every change of `tx`.
    pub fn rollback(&self, tx: TxId) {
        let Some(writes) = self.pending.lock().remove(&tx) else {
            return;
        };
        let catalog = self.catalog();
        let mut data = self.data.write();
        for id in writes.edges {
            let record = data.edges.get(&id).and_then(VersionChain::latest).cloned();
            let emptied = data.edges.get_mut(&id).is_some_and(|c| c.rollback(tx));
            if emptied && let Some(record) = record {
                data.unlink_edge(id, &record);
            }
        }
        for id in writes.nodes {
            let record = data.nodes.get(&id).and_then(VersionChain::latest).cloned();
            let emptied = data.nodes.get_mut(&id).is_some_and(|c| c.rollback(tx));
            if emptied && let Some(record) = record {
                let pk = catalog.table(record.table).and_then(|t| t.primary_key_index());
                data.unlink_node(id, &record, pk);
            }
        }
        tracing::trace!(tx = %tx, "rolled back");
    }

    /// Drops versions no snapshot at or after `min_epoch` can see.
    ///
    /// Returns the number of entities removed entirely.
    pub fn vacuum(&self, min_epoch: EpochId) -> usize {
        let catalog = self.catalog();
        let mut data = self.data.write();
        let mut dead_edges = Vec::new();
        for (id, chain) in &mut data.edges {
            let record = chain.latest().cloned();
            if chain.gc(min_epoch)
                && let Some(record) = record
            {
                dead_edges.push((*id, record));
            }
        }
        let mut dead_nodes = Vec::new();
        for (id, chain) in &mut data.nodes {
            let record = chain.latest().cloned();
            if chain.gc(min_epoch)
                && let Some(record) = record
            {
                dead_nodes.push((*id, record));
            }
        }
        let removed = dead_edges.len() + dead_nodes.len();
        for (id, record) in dead_edges {
            data.unlink_edge(id, &record);
        }
        for (id, record) in dead_nodes {
            let pk = catalog.table(record.table).and_then(|t| t.primary_key_index());
            data.unlink_node(id, &record, pk);
        }
        removed
    }

    // === Recovery ===

    /// Replays one logged change as committed at `epoch`.
    ///
    /// # Errors
    ///
    /// Fails if the change does not apply to the current contents, which
    /// means the log and the snapshot disagree.
    pub fn apply_committed(&self, mutation: &Mutation, epoch: EpochId) -> Result<()> {
        let view = TxView::new(EpochId(u64::MAX - 1), SYSTEM_TX);
        match mutation.clone() {
            Mutation::CreateTable(schema) => {
                self.create_table(schema)?;
            }
            Mutation::DropTable { table } => {
                self.drop_table(table)?;
            }
            Mutation::CreateNode { id, table, properties } => {
                self.insert_node(view, id, table, properties)?;
                self.next_node_id.fetch_max(id.0 + 1, Ordering::AcqRel);
            }
            Mutation::SetNodeProperty { id, column, value } => {
                self.set_node_property(view, id, column as usize, value)?;
            }
            Mutation::DeleteNode { id } => {
                self.delete_node(view, id, false)?;
            }
            Mutation::CreateEdge {
                id,
                table,
                src,
                dst,
                properties,
            } => {
                self.insert_edge(view, id, table, src, dst, properties)?;
                self.next_edge_id.fetch_max(id.0 + 1, Ordering::AcqRel);
            }
            Mutation::SetEdgeProperty { id, column, value } => {
                self.set_edge_property(view, id, column as usize, value)?;
            }
            Mutation::DeleteEdge { id } => {
                self.delete_edge(view, id)?;
            }
        }
        self.commit(SYSTEM_TX, epoch);
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("GraphStore")
            .field("nodes", &data.nodes.len())
            .field("edges", &data.edges.len())
            .finish()
    }
}

fn node_schema(catalog: &Catalog, table: TableId) -> Result<&Arc<TableSchema>> {
    catalog
        .table(table)
        .filter(|t| t.is_node())
        .ok_or_else(|| Error::execution(format!("Node table {table} does not exist")))
}

fn check_conflict(conflict: bool, what: &str, id: impl std::fmt::Display) -> Result<()> {
    if conflict {
        Err(TransactionError::WriteConflict(format!(
            "{what} {id} was modified by a transaction that committed after this one started"
        ))
        .into())
    } else {
        Ok(())
    }
}

fn named(schema: &TableSchema, values: &[Value]) -> Vec<(PropertyKey, Value)> {
    schema
        .properties
        .iter()
        .zip(values)
        .map(|(p, v)| (p.name.clone(), v.clone()))
        .collect()
}

fn label(schema: &TableSchema) -> ArcStr {
    schema.name.clone()
}

/// Converts a stored node into a result value using `catalog` for names.
#[must_use]
pub fn node_to_value(catalog: &Catalog, id: NodeId, record: &NodeRecord) -> Option<Value> {
    let schema = catalog.table(record.table)?;
    Some(Value::Node(Arc::new(NodeValue {
        id,
        label: label(schema),
        properties: named(schema, &record.properties),
    })))
}

/// Converts a stored relationship into a result value.
#[must_use]
pub fn edge_to_value(catalog: &Catalog, id: EdgeId, record: &EdgeRecord) -> Option<Value> {
    let schema = catalog.table(record.table)?;
    Some(Value::Rel(Arc::new(RelValue {
        id,
        src: record.src,
        dst: record.dst,
        label: label(schema),
        properties: named(schema, &record.properties),
    })))
}
