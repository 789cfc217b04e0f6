//! Graph data: the schema catalog, the versioned store and the mutation
//! records that describe committed changes.

mod catalog;
mod mutation;
mod store;

pub use catalog::{Catalog, PropertyDef, TableKind, TableSchema};
pub use mutation::Mutation;
pub use store::{
    EdgeRecord, GraphStore, NodeRecord, StoreSnapshot, StoreStats, TxView, edge_to_value, node_to_value,
};

/// Direction of an edge traversal relative to the anchor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges where the anchor is the source.
    Outgoing,
    /// Follow edges where the anchor is the destination.
    Incoming,
    /// Follow edges in either direction.
    Both,
}

impl Direction {
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }
}
