//! # trellis-engine
//!
//! The embedding surface of Trellis: open a [`Database`], [`connect`] a
//! [`Session`], run Cypher and pull rows from a [`QueryResult`].
//!
//! ```
//! use trellis_engine::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! let mut session = db.connect().unwrap();
//! session.execute("CREATE NODE TABLE Person(name STRING, PRIMARY KEY(name))").unwrap();
//! session.execute("CREATE (:Person {name: 'Ann'})").unwrap();
//!
//! let mut result = session.execute("MATCH (p:Person) RETURN p.name AS name").unwrap();
//! while result.has_next() {
//!     let row = result.get_next().unwrap();
//!     assert_eq!(row.get_value(0).unwrap().to_string(), "Ann");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`database`] - handles, the shared-store registry, checkpoints
//! - [`session`] - statement execution and explicit transactions
//! - [`result`] - the row cursor
//! - [`query`] - binding, planning and the compiled-statement cache
//! - [`transaction`] - transaction ids, epochs and the writer slot
//! - [`config`] / [`failure`] - settings and the public error type
//!
//! [`connect`]: Database::connect

pub mod config;
pub mod database;
pub mod failure;
pub mod query;
pub mod result;
pub mod session;
pub mod transaction;

pub use config::{Config, ConfigError, DurabilityMode};
pub use database::{Database, DatabaseStats, IN_MEMORY};
pub use failure::{ErrorKind, Failure, Stage};
pub use query::Params;
pub use result::{CursorState, QueryResult, Row};
pub use session::Session;
pub use trellis_common::types::{LogicalType, Value};
