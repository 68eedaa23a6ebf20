//! Error types for the replicator facade.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for replicator operations.
pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Errors raised while building a [`ReplicationConfiguration`].
///
/// These are never retried; the caller fixes the input and builds again.
///
/// [`ReplicationConfiguration`]: crate::ReplicationConfiguration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// The URL as supplied by the caller.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A certificate file was missing or unreadable.
    #[error("cannot read certificate {path:?}: {source}")]
    CertificateUnreadable {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The retry policy is out of range.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

impl ConfigurationError {
    pub(crate) fn invalid_endpoint(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the sync engine at session creation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused to create a session for the configuration.
    #[error("engine rejected replicator (code {code}): {message}")]
    CreationFailed {
        /// Native engine error code.
        code: i32,
        /// Native engine error message.
        message: String,
    },
}

impl EngineError {
    /// Returns the native engine error code.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::CreationFailed { code, .. } => *code,
        }
    }
}

/// Top-level error for the facade.
#[derive(Error, Debug)]
pub enum ReplicatorError {
    /// Configuration could not be built.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The engine rejected the session.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConfigurationError::invalid_endpoint("not a url", "missing scheme");
        assert_eq!(
            err.to_string(),
            "invalid endpoint \"not a url\": missing scheme"
        );

        let err = EngineError::CreationFailed {
            code: 7,
            message: "database is closed".into(),
        };
        assert!(err.to_string().contains("code 7"));
        assert!(err.to_string().contains("database is closed"));
        assert_eq!(err.code(), 7);
    }

    #[test]
    fn wraps_into_replicator_error() {
        let err: ReplicatorError = EngineError::CreationFailed {
            code: 1,
            message: "nope".into(),
        }
        .into();
        assert!(matches!(
            err,
            ReplicatorError::Engine(EngineError::CreationFailed { code: 1, .. })
        ));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ReplicatorError = ConfigurationError::CertificateUnreadable {
            path: PathBuf::from("/missing.pem"),
            source: io,
        }
        .into();
        assert!(err.to_string().contains("missing.pem"));
    }
}
