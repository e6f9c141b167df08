//! Engine error taxonomy.
//!
//! Kinds are carried as tagged values, never used for control flow inside
//! the engine. Mutation-pipeline errors are logged and leave the per-key
//! slot in place until a terminal decision; query errors increment counters
//! and surface to the caller.

use yuzu_query::SearchReply;

/// Error type spanning the engine surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request timed out")]
    DeadlineExceeded {
        /// Whatever the merge had accumulated when the deadline fired.
        partial: Option<SearchReply>,
    },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("partial failure: {0}")]
    PartialFailure(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<yuzu_index::IndexError> for EngineError {
    fn from(err: yuzu_index::IndexError) -> Self {
        match err {
            yuzu_index::IndexError::Parse(msg) => EngineError::Parse(msg),
            yuzu_index::IndexError::NotFound(msg) => EngineError::NotFound(msg),
            yuzu_index::IndexError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
        }
    }
}

impl From<yuzu_vector::VectorError> for EngineError {
    fn from(err: yuzu_vector::VectorError) -> Self {
        use yuzu_vector::VectorError;
        match err {
            VectorError::DimensionMismatch { .. } => EngineError::InvalidArgument(err.to_string()),
            VectorError::NotFound(msg) => EngineError::NotFound(msg),
            VectorError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            VectorError::Conflict(msg) => EngineError::Conflict(msg),
            VectorError::MagnitudeUnknown => EngineError::Internal(err.to_string()),
            VectorError::Internal(msg) => EngineError::Internal(msg),
            VectorError::Intern(e) => EngineError::ResourceExhausted(e.to_string()),
        }
    }
}

impl From<yuzu_query::FilterParseError> for EngineError {
    fn from(err: yuzu_query::FilterParseError) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<yuzu_query::QueryError> for EngineError {
    fn from(err: yuzu_query::QueryError) -> Self {
        use yuzu_query::QueryError;
        match err {
            QueryError::Parse(e) => e.into(),
            QueryError::NotFound(msg) => EngineError::NotFound(msg),
            QueryError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            QueryError::DeadlineExceeded { .. } => EngineError::DeadlineExceeded { partial: None },
            QueryError::Vector(e) => e.into(),
            QueryError::Index(e) => e.into(),
        }
    }
}
