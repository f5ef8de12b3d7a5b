//! Remote store client error types.

use std::sync::Arc;

/// Errors from the remote store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The configured base URL is not usable.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Authentication failed (missing or invalid API key).
    #[error("authentication failed")]
    AuthError,

    /// Rate limited by the remote store.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { RemoteError::Timeout } else { RemoteError::Network(Arc::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RemoteError::HttpError { status: 503 }.to_string(), "HTTP error: 503");
        assert!(RemoteError::InvalidUrl("nope".into()).to_string().contains("nope"));
    }
}
