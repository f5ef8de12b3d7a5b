//! Errors surfaced by a reconciliation pass.
//!
//! Per-record upload failures never appear here; they are reported through
//! telemetry and leave the record pending.

use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Building the remote duplicate index failed; the whole batch is retried.
    #[error("REMOTE_INDEX_FAILED: {0}")]
    RemoteIndex(#[source] RemoteError),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_error_display_and_source() {
        let err = SyncError::RemoteIndex(RemoteError::Timeout);
        assert!(err.to_string().starts_with("REMOTE_INDEX_FAILED"));
        assert!(err.source().is_some_and(|s| s.to_string() == RemoteError::Timeout.to_string()));
    }
}
