//! Common error types for fleet coordination components.

use thiserror::Error;

/// Errors raised by the cluster coordination layer
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Missing or unusable cluster configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration value failed validation
    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    /// Remote node or local socket unreachable
    #[error("Connection to {target} failed: {reason}")]
    ConnectFailed { target: String, reason: String },

    /// Coordination store unreachable after all connect attempts
    #[error("Coordination store unavailable after {attempts} attempt(s): {reason}")]
    CoordinationUnavailable { attempts: u32, reason: String },

    /// Ciphertext was tampered with or sealed under another key
    #[error("Could not decrypt message from {0}")]
    DecryptionFailed(String),

    /// Malformed command or frame
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer answered with a non-zero error code
    #[error("Remote error from {peer}: {message}")]
    Remote { peer: String, message: String },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// I/O failure on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Validation { .. } => 400,
            Self::ConnectFailed { .. } => 502,
            Self::CoordinationUnavailable { .. } => 503,
            Self::DecryptionFailed(_) => 502,
            Self::ProtocolViolation(_) => 400,
            Self::Remote { .. } => 502,
            Self::Timeout(_) => 504,
            Self::Io(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried.
    /// Decryption failures and retry-exhausted store errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = ClusterError::validation("key", "must be 32 characters long");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'key': must be 32 characters long"
        );
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_final_errors_are_not_retryable() {
        assert!(!ClusterError::DecryptionFailed("10.0.0.2".into()).is_retryable());
        assert!(
            !ClusterError::CoordinationUnavailable {
                attempts: 100,
                reason: "refused".into()
            }
            .is_retryable()
        );
        assert!(ClusterError::Timeout("read".into()).is_retryable());
    }
}
