//! Error types for easy-db.
//!
//! Every failure the facade can report is a [`DbError`] variant. Driver errors
//! are carried verbatim as the `source` of the variant so callers can inspect
//! the original `sqlx::Error`; this layer never rewrites their messages.

use crate::models::DatabaseType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool not found: {alias}")]
    PoolNotFound { alias: String },

    #[error("Failed to acquire a connection from pool '{alias}': {message}")]
    ConnectionAcquisitionFailed {
        alias: String,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Execution failed: {message}")]
    ExecutionFailed {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("Fetch failed after {rows_fetched} row(s): {message}")]
    FetchFailed {
        rows_fetched: usize,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to release connection to pool '{alias}': {message}")]
    ReleaseFailed {
        alias: String,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{operation} is not supported by {db_type}")]
    Unsupported {
        operation: String,
        db_type: DatabaseType,
    },
}

impl DbError {
    /// Create a pool not found error.
    pub fn pool_not_found(alias: impl Into<String>) -> Self {
        Self::PoolNotFound {
            alias: alias.into(),
        }
    }

    /// Create an acquisition error from the driver's error.
    pub fn acquisition_failed(alias: impl Into<String>, source: sqlx::Error) -> Self {
        Self::ConnectionAcquisitionFailed {
            alias: alias.into(),
            message: source.to_string(),
            source,
        }
    }

    /// Create an execution error, keeping the driver's diagnostic untouched.
    pub fn execution_failed(source: sqlx::Error) -> Self {
        let sql_state = match &source {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
            _ => None,
        };
        Self::ExecutionFailed {
            message: source.to_string(),
            sql_state,
            source,
        }
    }

    /// Create a mid-cursor fetch error.
    pub fn fetch_failed(rows_fetched: usize, source: sqlx::Error) -> Self {
        Self::FetchFailed {
            rows_fetched,
            message: source.to_string(),
            source,
        }
    }

    /// Create a release error.
    pub fn release_failed(alias: impl Into<String>, source: sqlx::Error) -> Self {
        Self::ReleaseFailed {
            alias: alias.into(),
            message: source.to_string(),
            source,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, db_type: DatabaseType) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            db_type,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolNotFound { .. } => Some("Register the pool alias at startup"),
            _ => None,
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Whether the caller may reasonably retry.
    ///
    /// Only acquisition failures qualify: statement idempotence is unknown
    /// here, so execution and fetch errors are never reported as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionAcquisitionFailed { .. } | Self::Connection { .. }
        )
    }

    /// The underlying driver error, when the failure came from sqlx.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::ConnectionAcquisitionFailed { source, .. }
            | Self::ExecutionFailed { source, .. }
            | Self::FetchFailed { source, .. }
            | Self::ReleaseFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True when the driver error means the connection itself is unusable.
    ///
    /// The lifecycle guard closes such connections instead of handing them
    /// back to the pool.
    pub fn is_connection_broken(&self) -> bool {
        match self.driver_error() {
            Some(err) => is_broken_connection_error(err),
            None => false,
        }
    }
}

/// Classify a driver error as connection-level.
pub(crate) fn is_broken_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
