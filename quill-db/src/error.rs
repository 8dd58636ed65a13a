//! Error Types for the Store
//!
//! Every fallible store operation returns [`StoreResult`]. Nothing here is
//! retried: a connection failure, a rejected statement and a misuse of a
//! transaction scope all surface to the caller unchanged.

use std::error::Error as _;

use quill_core::ValueError;

/// Errors raised by the store, its pool and its transaction scopes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Pool exhausted or closed, or the backend is unreachable.
    #[error("connection error: {reason}")]
    Connection { reason: String },

    /// The backend rejected the statement (syntax, constraint violation...).
    #[error("statement failed: {message}")]
    Statement {
        message: String,
        /// SQLSTATE code when the backend supplied one.
        code: Option<String>,
        /// Violated constraint name, if any.
        constraint: Option<String>,
    },

    /// Operation not allowed in the current state, e.g. a statement on a
    /// transaction scope that was never begun or is already closed.
    #[error("invalid usage: {reason}")]
    Usage { reason: String },

    /// A returned value could not be converted to the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] ValueError),

    #[error("invalid configuration for {field}: {reason}")]
    Config { field: String, reason: String },

    /// A spawned store task panicked or was cancelled.
    #[error("store task failed: {reason}")]
    Task { reason: String },
}

impl StoreError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            code: None,
            constraint: None,
        }
    }

    pub fn usage(reason: impl Into<String>) -> Self {
        Self::Usage {
            reason: reason.into(),
        }
    }

    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// SQLSTATE code of a rejected statement.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the backend reported a unique-constraint violation (23505).
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some("23505")
    }
}

/// Convert from deadpool_postgres::PoolError to StoreError.
impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                StoreError::connection("connection pool exhausted")
            }
            deadpool_postgres::PoolError::Closed => {
                StoreError::connection("connection pool is closed")
            }
            deadpool_postgres::PoolError::Backend(e) => StoreError::from(e),
            other => StoreError::connection(other.to_string()),
        }
    }
}

/// Convert from tokio_postgres::Error to StoreError.
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Column decoding failures raised by `Value` itself.
        if let Some(decode) = err
            .source()
            .and_then(|source| source.downcast_ref::<ValueError>())
        {
            return StoreError::Decode(decode.clone());
        }

        if let Some(db) = err.as_db_error() {
            tracing::debug!(code = db.code().code(), "Statement rejected: {}", db.message());
            return StoreError::Statement {
                message: db.message().to_string(),
                code: Some(db.code().code().to_string()),
                constraint: db.constraint().map(str::to_string),
            };
        }

        tracing::error!("Database error: {:?}", err);

        let io_failure = err
            .source()
            .is_some_and(|source| source.is::<std::io::Error>());
        if err.is_closed() || io_failure {
            StoreError::connection(err.to_string())
        } else {
            StoreError::Statement {
                message: err.to_string(),
                code: err.code().map(|c| c.code().to_string()),
                constraint: None,
            }
        }
    }
}

/// Convert from tokio::task::JoinError to StoreError.
impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!("Store task failed: {:?}", err);
        StoreError::Task {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
