//! Common utilities used throughout Trellis.
//!
//! - [`error`] - Error types like [`Error`] and [`QueryError`](error::QueryError)
//! - [`hash`] - Fast hashing with FxHash (non-cryptographic)
//! - [`strings`] - "did you mean" suggestions for binding errors

pub mod error;
pub mod hash;
pub mod strings;

pub use error::{Error, Result};
pub use hash::{FxHashMap, FxHashSet};
