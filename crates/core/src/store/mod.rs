//! SQLite-backed local storage shared by the cache and the queue.
//!
//! A single tokio-rusqlite connection owns the database on a background
//! thread, so every cache and queue operation is serialized through it.
//! When the engine cannot be opened the store becomes a null object and
//! callers see empty results instead of errors.

pub mod connection;
pub mod migrations;

pub use connection::LocalStore;

/// Log a storage failure and fall back to `default`.
pub(crate) fn degrade<T>(op: &'static str, result: Result<T, crate::Error>, default: T) -> T {
    match result {
        Ok(value) => value,
        Err(crate::Error::StorageUnavailable) => {
            tracing::debug!(op, "local storage unavailable; returning default");
            default
        }
        Err(e) => {
            tracing::warn!(op, error = %e, "local storage operation failed");
            default
        }
    }
}
