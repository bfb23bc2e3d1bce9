//! Error types surfaced to the hosting program.

use serde::{Deserialize, Serialize};

/// Classification of a client error, surfaced alongside the `Error`
/// conversation state so hosts can branch on recovery strategy without
/// parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Microphone acquisition failed or was refused.
    MicDenied,
    /// A request timer fired, or the transport was not ready when needed.
    NetworkTimeout,
    /// The transport reported a channel-level error.
    NetworkError,
    /// The server answered with `kind: error`, or initialization raised.
    ServerError,
    /// The player failed to establish playable buffers.
    DecodeError,
}

impl ErrorKind {
    /// Wire/log label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MicDenied => "mic_denied",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::DecodeError => "decode_error",
        }
    }
}

/// Error type for client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("microphone unavailable: {0}")]
    MicDenied(String),
    #[error("request timed out: {0}")]
    NetworkTimeout(String),
    #[error("transport error: {0}")]
    NetworkError(String),
    #[error("server error: {0}")]
    ServerError(String),
    #[error("audio decode error: {0}")]
    DecodeError(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("invalid state for operation: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// Map this error onto the host-facing taxonomy.
    ///
    /// Configuration and state misuse surface as `ServerError` when they
    /// reach the error hook during initialization.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::MicDenied(_) => ErrorKind::MicDenied,
            ClientError::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            ClientError::NetworkError(_) => ErrorKind::NetworkError,
            ClientError::ServerError(_)
            | ClientError::ConfigurationError(_)
            | ClientError::InvalidState(_) => ErrorKind::ServerError,
            ClientError::DecodeError(_) => ErrorKind::DecodeError,
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ClientError::MicDenied("denied".into()).kind(),
            ErrorKind::MicDenied
        );
        assert_eq!(
            ClientError::NetworkTimeout("50s".into()).kind(),
            ErrorKind::NetworkTimeout
        );
        assert_eq!(
            ClientError::ConfigurationError("bad speed".into()).kind(),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::MicDenied.as_str(), "mic_denied");
        assert_eq!(ErrorKind::NetworkTimeout.as_str(), "network_timeout");
        assert_eq!(ErrorKind::NetworkError.as_str(), "network_error");
        assert_eq!(ErrorKind::ServerError.as_str(), "server_error");
        assert_eq!(ErrorKind::DecodeError.as_str(), "decode_error");
    }
}
