//! Error types for ceremony coordination

use std::time::Duration;
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a ceremony
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid party or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Relay unreachable or answered with a non-2xx status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Ciphertext could not be authenticated with the session key
    #[error("Decrypt error: {0}")]
    Decrypt(String),

    /// The native library rejected a setup blob or protocol message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The setup message commits to a different digest than the one requested
    #[error("Message mismatch: expected {expected}, setup message carries {actual}")]
    MessageMismatch { expected: String, actual: String },

    /// The inbox deadline elapsed before the ceremony completed
    #[error("Session timeout: ceremony did not finish within {0:?}")]
    SessionTimeout(Duration),

    /// Not every committee member reported completion in time
    #[error("Quorum timeout after {polls} polls, missing parties: {missing:?}")]
    QuorumTimeout { polls: u32, missing: Vec<String> },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// No stored key share for the requested public key
    #[error("Key share not found for public key {0}")]
    KeyShareNotFound(String),

    /// Every attempt of a ceremony failed
    #[error("ceremony failed after {attempts} attempts: {source}")]
    CeremonyFailed {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a fresh ceremony attempt may clear this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::MessageMismatch { .. } | Error::InvalidConfig(_) | Error::KeyShareNotFound(_)
        )
    }

    /// The underlying cause, looking through `CeremonyFailed`.
    pub fn root(&self) -> &Error {
        match self {
            Error::CeremonyFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<msg_relay::RelayError> for Error {
    fn from(e: msg_relay::RelayError) -> Self {
        Error::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceremony_failed_display() {
        let err = Error::CeremonyFailed {
            attempts: 3,
            source: Box::new(Error::SessionTimeout(Duration::from_secs(60))),
        };
        assert_eq!(
            err.to_string(),
            "ceremony failed after 3 attempts: Session timeout: ceremony did not finish within 60s"
        );
        assert!(matches!(err.root(), Error::SessionTimeout(_)));
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::Transport("down".into()).is_retryable());
        assert!(Error::Decrypt("tag".into()).is_retryable());
        assert!(!Error::MessageMismatch {
            expected: "aa".into(),
            actual: "bb".into()
        }
        .is_retryable());
    }
}
