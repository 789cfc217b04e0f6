//! # trellis-common
//!
//! Building blocks shared by every Trellis crate. Nothing here knows about
//! queries or storage; it is the vocabulary the rest of the engine speaks.
//!
//! - [`types`] - identifiers ([`NodeId`](types::NodeId), [`TxId`](types::TxId),
//!   [`EpochId`](types::EpochId)), the dynamic [`Value`](types::Value) and
//!   [`LogicalType`](types::LogicalType)
//! - [`mvcc`] - version chains that decide which row version a snapshot sees
//! - [`memory`] - the buffer-pool budget blocking operators reserve against
//! - [`utils`] - error types, hashing aliases, "did you mean" suggestions

pub mod memory;
pub mod mvcc;
pub mod types;
pub mod utils;

pub use types::{EdgeId, EpochId, LogicalType, NodeId, PropertyKey, TableId, TxId, Value};
pub use utils::error::{Error, Result};
