//! Transaction management: ids, epochs and the single writer slot.

mod manager;

pub use manager::{SnapshotPin, TransactionManager, TxInfo, TxState};
