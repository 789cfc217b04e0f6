//! # trellis-core
//!
//! The data layer and the execution machinery of Trellis.
//!
//! - [`graph`] - catalog of node/rel tables and the MVCC graph store
//! - [`cache`] - the second-chance LRU used for compiled statements
//! - [`execution`] - expressions and pull-based row operators

pub mod cache;
pub mod execution;
pub mod graph;

pub use graph::{Catalog, Direction, GraphStore, Mutation, TableSchema, TxView};
