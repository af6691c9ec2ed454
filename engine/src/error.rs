//! Error types for the Duet engine.

use crate::CollectionName;
use thiserror::Error;

/// Failures reported by a [`RemoteStore`](crate::RemoteStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached (offline, DNS, connection refused).
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote request timed out")]
    Timeout,

    /// The remote understood the request and refused it.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout)
    }
}

/// All possible errors from the Duet engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Local store errors
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("collection registered twice: {0}")]
    DuplicateCollection(CollectionName),

    #[error("invalid operation log: {0}")]
    InvalidLog(String),

    // Sync errors
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("bootstrap failed for '{collection}': {reason}")]
    Bootstrap {
        collection: CollectionName,
        reason: String,
    },

    #[error("legacy migration failed for '{collection}': {reason}")]
    Migration {
        collection: CollectionName,
        reason: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("memories".into());
        assert_eq!(err.to_string(), "collection not found: memories");

        let err = Error::Bootstrap {
            collection: "love_notes".into(),
            reason: "remote unavailable: offline".into(),
        };
        assert_eq!(
            err.to_string(),
            "bootstrap failed for 'love_notes': remote unavailable: offline"
        );

        let err: Error = RemoteError::Timeout.into();
        assert_eq!(err.to_string(), "remote request timed out");
    }

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Unavailable("offline".into()).is_transient());
        assert!(RemoteError::Timeout.is_transient());
        assert!(!RemoteError::Rejected("bad payload".into()).is_transient());
    }
}
