//! The error type of the embedding boundary.
//!
//! Internally every layer returns [`trellis_common::Error`]. At the public
//! surface that error is wrapped together with the [`Stage`] that detected
//! it and a flat [`ErrorKind`], which is what bindings switch on.

use std::fmt;

use trellis_common::utils::error::{Error, QueryErrorKind, TransactionError};

/// Where a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Opening the database.
    Open,
    /// Creating a session.
    Connect,
    /// Parsing, binding or planning a query.
    Compile,
    /// Running a query (including eager writes).
    Execute,
    /// Pulling a row from a result.
    Fetch,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Connect => "connect",
            Self::Compile => "compile",
            Self::Execute => "execute",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StorageOpen,
    InvalidHandle,
    Syntax,
    Binding,
    Execution,
    WriteConflict,
    Fetch,
    CursorExhausted,
    IndexOutOfRange,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageOpen => "StorageOpenError",
            Self::InvalidHandle => "InvalidHandleError",
            Self::Syntax => "SyntaxError",
            Self::Binding => "BindingError",
            Self::Execution => "ExecutionError",
            Self::WriteConflict => "WriteConflictError",
            Self::Fetch => "FetchError",
            Self::CursorExhausted => "CursorExhaustedError",
            Self::IndexOutOfRange => "IndexOutOfRangeError",
        }
    }

    /// Classifies an internal error detected at `stage`.
    ///
    /// I/O, serialization and internal errors have no kind of their own: they
    /// count as a storage failure while opening and as an execution failure
    /// anywhere else.
    #[must_use]
    pub fn classify(error: &Error, stage: Stage) -> Self {
        match error {
            Error::StorageOpen(_) => Self::StorageOpen,
            Error::InvalidHandle(_) => Self::InvalidHandle,
            Error::Query(q) => match q.kind {
                QueryErrorKind::Syntax => Self::Syntax,
                QueryErrorKind::Binding => Self::Binding,
                QueryErrorKind::Execution => Self::Execution,
            },
            Error::Transaction(TransactionError::WriteConflict(_)) => Self::WriteConflict,
            Error::Transaction(TransactionError::InvalidState(_)) => Self::Execution,
            Error::Fetch(_) => Self::Fetch,
            Error::CursorExhausted => Self::CursorExhausted,
            Error::IndexOutOfRange { .. } => Self::IndexOutOfRange,
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                if stage == Stage::Open {
                    Self::StorageOpen
                } else {
                    Self::Execution
                }
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error as seen by callers: what went wrong, where, and the full message.
#[derive(Debug)]
pub struct Failure {
    stage: Stage,
    kind: ErrorKind,
    error: Error,
}

impl Failure {
    #[must_use]
    pub fn new(stage: Stage, error: Error) -> Self {
        let kind = ErrorKind::classify(&error, stage);
        Self { stage, kind, error }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// The underlying error.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    #[must_use]
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Attaches a stage to internal results.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, Failure>;
}

impl<T> AtStage<T> for trellis_common::Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, Failure> {
        self.map_err(|e| Failure::new(stage, e))
    }
}
