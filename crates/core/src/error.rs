//! Unified error types for corkscan local storage.

use tokio_rusqlite::rusqlite;

/// Unified error type for the local cache and queue.
///
/// The public cache and queue APIs never surface these; they log and fall
/// back to safe defaults. The `try_*` paths underneath return them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty source text).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("STORAGE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORAGE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The storage engine could not be opened, or its connection thread has
    /// shut down; the store behaves as a null object.
    #[error("STORAGE_UNAVAILABLE")]
    StorageUnavailable,

    /// A stored record or payload could not be (de)serialized.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),
}

/// Storage closures return [`Error`] directly, so their errors pass through
/// unchanged. A closed connection thread means storage is gone for good.
impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::StorageUnavailable,
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::StorageUnavailable,
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => Error::StorageUnavailable,
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_display() {
        assert!(Error::InvalidInput("empty".into()).to_string().starts_with("INVALID_INPUT"));
        assert!(Error::MigrationFailed("3 (queue)".into()).to_string().contains("3 (queue)"));
        assert_eq!(Error::StorageUnavailable.to_string(), "STORAGE_UNAVAILABLE");
    }

    #[test]
    fn test_closed_connection_means_unavailable() {
        let err: Error = tokio_rusqlite::Error::<Error>::ConnectionClosed.into();
        assert!(matches!(err, Error::StorageUnavailable));

        let err: Error = tokio_rusqlite::Error::<rusqlite::Error>::ConnectionClosed.into();
        assert!(matches!(err, Error::StorageUnavailable));

        let err: Error = tokio_rusqlite::Error::Error(Error::InvalidInput("x".into())).into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_rusqlite_error_conversion() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Database(tokio_rusqlite::Error::Error(_))));
    }
}
