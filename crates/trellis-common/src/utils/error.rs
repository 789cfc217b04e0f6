//! Error types shared by every layer of the engine.
//!
//! [`Error`] is what internal code returns. The embedding boundary wraps it
//! together with the stage that produced it; see `trellis_engine::Failure`.

use std::fmt;
use thiserror::Error;

/// Result alias used across Trellis crates.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The store could not be opened or created.
    #[error("cannot open storage: {0}")]
    StorageOpen(String),

    /// The handle (or a session/result depending on it) was closed.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A result cursor is in the failed state.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("cursor exhausted: no more rows")]
    CursorExhausted,

    #[error("index {index} out of range for row with {len} values")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an execution-stage [`QueryError`].
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Query(QueryError::new(QueryErrorKind::Execution, message))
    }

    /// Shorthand for a binding-stage [`QueryError`].
    #[must_use]
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Query(QueryError::new(QueryErrorKind::Binding, message))
    }

    /// The query error kind, if this is a query error.
    #[must_use]
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Self::Query(q) => Some(q.kind),
            _ => None,
        }
    }
}

/// Which compile/run phase rejected a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Malformed query text.
    Syntax,
    /// Unknown table, property, variable, function or parameter.
    Binding,
    /// Runtime failure: constraint violation, type mismatch, overflow, timeout.
    Execution,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "Syntax error"),
            Self::Binding => write!(f, "Binding error"),
            Self::Execution => write!(f, "Execution error"),
        }
    }
}

/// Location of a problem in the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    /// Byte offset of the first offending character.
    pub start: usize,
    /// Byte offset one past the last offending character.
    pub end: usize,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, counted in characters.
    pub column: u32,
}

impl SourceSpan {
    #[must_use]
    pub const fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

/// A query that could not be compiled or run.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub hint: Option<String>,
}

impl QueryError {
    #[must_use]
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(span) = self.span {
            write!(f, " at line {}, column {} (offset {})", span.line, span.column, span.start)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {}

/// Transaction failures.
#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    /// Another transaction holds the write slot or committed a newer version.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// Begin/commit/rollback called in the wrong state.
    #[error("invalid transaction state: {0}")]
    InvalidState(String),
}
