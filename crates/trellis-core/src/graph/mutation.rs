//! Logical descriptions of committed changes.
//!
//! The store records one [`Mutation`] per change a transaction makes. On
//! commit the list is handed to the write-ahead log, and recovery feeds the
//! same values back through [`GraphStore::apply_committed`](super::GraphStore::apply_committed).

use serde::{Deserialize, Serialize};

use trellis_common::types::{EdgeId, NodeId, TableId, Value};

use super::TableSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// A table was created with the id stored in the schema.
    CreateTable(TableSchema),

    /// A table and all of its rows were dropped.
    DropTable { table: TableId },

    CreateNode {
        id: NodeId,
        table: TableId,
        /// Full property row in schema order.
        properties: Vec<Value>,
    },

    /// Overwrite one property column of a node.
    SetNodeProperty { id: NodeId, column: u32, value: Value },

    DeleteNode { id: NodeId },

    CreateEdge {
        id: EdgeId,
        table: TableId,
        src: NodeId,
        dst: NodeId,
        properties: Vec<Value>,
    },

    SetEdgeProperty { id: EdgeId, column: u32, value: Value },

    DeleteEdge { id: EdgeId },
}

impl Mutation {
    /// Whether this change alters the schema rather than data.
    #[must_use]
    pub fn is_ddl(&self) -> bool {
        matches!(self, Self::CreateTable(_) | Self::DropTable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(m: &Mutation) -> Mutation {
        let json = serde_json::to_string(m).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_create_node_roundtrip() {
        let m = Mutation::CreateNode {
            id: NodeId::new(4),
            table: TableId::new(0),
            properties: vec![Value::from("Alice"), Value::Null],
        };
        assert_eq!(roundtrip(&m), m);
        assert!(!m.is_ddl());
    }

    #[test]
    fn test_drop_table_is_ddl() {
        let m = Mutation::DropTable { table: TableId::new(3) };
        assert_eq!(roundtrip(&m), m);
        assert!(m.is_ddl());
    }
}
