//! Error types of the PostgREST storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`PostgrestDaoError`] failures.
pub type PostgrestResult<T> = Result<T, PostgrestDaoError>;

/// Failures that can occur while talking to PostgREST.
#[derive(Debug, Error)]
pub enum PostgrestDaoError {
    /// Required environment variable is missing.
    #[error("missing PostgREST environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build PostgREST client")]
    ClientBuilder {
        /// HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send PostgREST request to `{path}`")]
    RequestSend {
        /// Requested resource.
        path: String,
        /// HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// PostgREST answered with a non-success status.
    #[error("PostgREST returned {status} for `{path}`: {message}")]
    RequestStatus {
        /// Requested resource.
        path: String,
        /// Response status.
        status: StatusCode,
        /// Error body rendered as text.
        message: String,
    },
    /// Response payload could not be decoded.
    #[error("failed to decode PostgREST response for `{path}`")]
    DecodeResponse {
        /// Requested resource.
        path: String,
        /// Decoding error.
        #[source]
        source: reqwest::Error,
    },
    /// A `PATCH` matched no row.
    #[error("`{table}` row `{id}` not found")]
    MissingRow {
        /// Remote table name.
        table: &'static str,
        /// Primary key of the patched row.
        id: i64,
    },
    /// A timestamp could not be rendered for a filter.
    #[error("failed to format change cursor")]
    CursorFormat {
        /// Formatting error.
        #[source]
        source: time::error::Format,
    },
}

impl From<PostgrestDaoError> for StorageError {
    fn from(err: PostgrestDaoError) -> Self {
        match err {
            PostgrestDaoError::MissingRow { table, id } => StorageError::NotFound { table, id },
            PostgrestDaoError::RequestStatus { status, .. }
                if status.is_client_error()
                    && status != StatusCode::UNAUTHORIZED
                    && status != StatusCode::REQUEST_TIMEOUT
                    && status != StatusCode::TOO_MANY_REQUESTS =>
            {
                StorageError::rejected(err.to_string())
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
