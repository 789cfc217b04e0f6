//! # trellis-adapters
//!
//! The edges of the engine: turning query text into syntax trees, and
//! turning the in-memory store into files that survive a restart.
//!
//! - [`query`] - the Cypher lexer, parser and AST
//! - [`storage`] - meta file, lock file, snapshots and the write-ahead log

pub mod query;
pub mod storage;
