//! Error types for fetching exit lists and serving registry queries.

use thiserror::Error;

/// Failure to retrieve a single exit list source.
///
/// These never reach callers of the registry: a failed source is logged and
/// dropped from the refresh cycle it belongs to.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request or body read failed.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Source did not answer within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Source answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(e)
        }
    }
}

/// Error returned by [`ExitNodeRegistry`](crate::ExitNodeRegistry) operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The HTTP client could not be built from the configuration.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// A refresh cycle completed without a single address (strict mode only).
    #[error("refresh produced no exit node addresses from {sources} source(s)")]
    EmptyRefresh {
        /// Number of sources attempted.
        sources: usize,
    },

    /// The background refresh task did not run to completion.
    #[error("refresh aborted: {0}")]
    RefreshAborted(String),

    /// A thread panicked while holding the registry lock.
    #[error("registry lock poisoned")]
    LockPoisoned,
}
