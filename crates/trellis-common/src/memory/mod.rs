//! Memory accounting for query execution.
//!
//! - [`buffer`] - the handle-wide buffer pool budget

pub mod buffer;

pub use buffer::{BufferPool, Reservation};
