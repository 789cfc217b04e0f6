//! Core types used throughout Trellis.

mod id;
mod logical_type;
mod value;

pub use id::{EdgeId, EpochId, NodeId, TableId, TxId};
pub use logical_type::LogicalType;
pub use value::{HashableValue, NodeValue, OrderableValue, OrderedFloat64, PropertyKey, RelValue, Value};
