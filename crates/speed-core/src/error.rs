//! Error types for Speed.
//!
//! This module provides a unified error type for all Speed operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Speed operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Speed.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not reach the signaling relay (E001)
    #[error("could not connect to signaling relay: {0}")]
    RelayUnreachable(String),

    /// The relay refused our registration or reported an error (E002)
    #[error("relay error: {0}")]
    Relay(String),

    /// Room ID already registered by another peer (E003)
    #[error("room ID '{0}' is taken")]
    IdTaken(String),

    /// The peer we tried to reach is not connected to the relay (E004)
    #[error("could not connect to peer '{0}'")]
    PeerUnavailable(String),

    /// Direct connection to the peer failed (E005)
    #[error("connection error: {0}")]
    ConnectionFailed(String),

    /// The data channel closed before the end marker arrived (E006)
    #[error("connection lost during transfer")]
    ConnectionLost,

    /// Received file data before its metadata (E007)
    #[error("received file without metadata")]
    MissingMetadata,

    /// Reading a local file failed (E008)
    #[error("error reading file '{path}': {reason}")]
    FileRead {
        /// Path that failed
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// Invalid room ID format
    #[error("invalid room ID: {0}")]
    InvalidRoomId(String),

    /// Invalid user input (empty selection, blank receiver, bad address)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Unsupported protocol version
    #[error("unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },

    /// Unexpected message type
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type
        expected: String,
        /// Actual message type received
        actual: String,
    },

    /// Building a multi-file bundle failed
    #[error("failed to bundle files: {0}")]
    BundleFailed(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::RelayUnreachable(_) => Some("E001"),
            Self::Relay(_) => Some("E002"),
            Self::IdTaken(_) => Some("E003"),
            Self::PeerUnavailable(_) => Some("E004"),
            Self::ConnectionFailed(_) => Some("E005"),
            Self::ConnectionLost => Some("E006"),
            Self::MissingMetadata => Some("E007"),
            Self::FileRead { .. } => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether restarting the operation by hand may succeed.
    ///
    /// Nothing is retried automatically.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RelayUnreachable(_)
                | Self::IdTaken(_)
                | Self::PeerUnavailable(_)
                | Self::ConnectionFailed(_)
                | Self::ConnectionLost
                | Self::Timeout(_)
        )
    }

    /// Render the error as the status line shown to the user.
    #[must_use]
    pub fn status(&self) -> String {
        match self {
            Self::MissingMetadata => "Error: Received file without metadata.".to_string(),
            Self::PeerUnavailable(_) => "Error: Could not connect to peer ID.".to_string(),
            Self::ConnectionFailed(reason) => format!("Connection error: {reason}"),
            Self::FileRead { reason, .. } => format!("Error reading file: {reason}"),
            other => format!("Error: {other}"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MissingMetadata.code(), Some("E007"));
        assert_eq!(Error::ConnectionLost.code(), Some("E006"));
        assert_eq!(Error::Internal("x".into()).code(), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            Error::MissingMetadata.status(),
            "Error: Received file without metadata."
        );
        assert_eq!(
            Error::FileRead {
                path: "a.txt".into(),
                reason: "denied".into()
            }
            .status(),
            "Error reading file: denied"
        );
        assert!(Error::Timeout(30).status().starts_with("Error: "));
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::ConnectionLost.is_recoverable());
        assert!(!Error::MissingMetadata.is_recoverable());
    }
}
