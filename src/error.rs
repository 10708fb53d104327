//! Error types for the workflow engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by graph construction, data scopes and workflow control.
///
/// All graph-mutation errors are reported before any state is changed, so a
/// failed call leaves the graph exactly as it was.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required step, connection or callback was not supplied
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// A numeric argument fell outside its valid range
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: i64 },

    /// An argument was well-formed but invalid in context
    #[error("invalid argument {what}: {reason}")]
    InvalidArgument { what: &'static str, reason: String },

    /// The operation is not permitted in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An OS primitive failed (thread creation and the like)
    #[error("system error: {0}")]
    System(String),
}

impl EngineError {
    pub(crate) fn invalid_argument(what: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            what,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        EngineError::InvalidOperation(reason.into())
    }
}
