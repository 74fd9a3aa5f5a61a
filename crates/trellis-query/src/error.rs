use thiserror::Error;

/// Unified error type for all query gateway operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed request: unknown column, unsupported operator, bad cast,
    /// invalid join path, delete without filter, unsupported db type
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Descriptor id or referenced table does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection, execution or metadata failure in the target backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// A descriptor name is already taken by a different id
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The client aborted mid-stream
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation inside the gateway
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        QueryError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        QueryError::NotFound(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        QueryError::Backend(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        QueryError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
