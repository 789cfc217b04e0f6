//! Cypher front-end: text to [`Statement`](ast::Statement).
//!
//! Supports the read/write subset the engine executes (`MATCH`, `WHERE`,
//! `WITH`, `UNWIND`, `CREATE`, `SET`, `DELETE`, `RETURN` with ordering and
//! paging), schema DDL for node and rel tables, transaction control and
//! `EXPLAIN`.

pub mod ast;
mod lexer;
mod parser;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{Parser, parse};
