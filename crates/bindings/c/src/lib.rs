//! C bindings for Trellis.
//!
//! # Memory Management
//!
//! Every pointer handed out through an out-parameter is owned by the caller
//! and must be released with the matching `trellis_free_*` function. Strings
//! produced by [`trellis_value_to_string`] are freed with
//! [`trellis_free_string`]. Column names and error strings are borrowed: they
//! stay valid until the owning result is freed, or until the next call on the
//! same thread, respectively.
//!
//! # Error Handling
//!
//! Functions return a [`TrellisStatus`]. On failure the message, stage and
//! kind are kept in thread-local storage and read back with
//! [`trellis_last_error`], [`trellis_last_error_stage`] and
//! [`trellis_last_error_kind`]. A panic inside the library is caught at the
//! boundary and reported the same way.
//!
//! # Thread Safety
//!
//! A [`TrellisDatabase`] may be shared across threads. Sessions and results
//! are internally locked but are meant to be driven by one thread at a time.

#![allow(unsafe_code)]

mod database;
mod error;
mod query;
mod types;

pub use database::*;
pub use error::*;
pub use query::*;
pub use types::*;
