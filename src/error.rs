use thiserror::Error;

use serde::{Deserialize, Serialize};

/// Whether retrying after this error may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient network trouble, server hiccup).
    Retryable,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Transport-level failure reported by an engine when the socket dies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Server closes with code 1000 when it explicitly terminated the session
/// and does not want the client to come back.
const STOP_CODE: i64 = 1000;

/// Authentication error code band: expired, not yet valid, invalid signature.
const TOKEN_INVALID_CODES: std::ops::RangeInclusive<i64> = 40..=42;

/// Structured error object the server embeds in a frame instead of an event.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("server error {code}: {message}")]
pub struct ServerError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ServerError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
        }
    }

    /// The server told us to stop reconnecting.
    pub fn is_stop(&self) -> bool {
        self.code == STOP_CODE
    }

    /// The auth token is expired or otherwise unusable; reconnecting with
    /// the same credentials cannot succeed.
    pub fn is_invalid_token(&self) -> bool {
        TOKEN_INVALID_CODES.contains(&self.code)
    }

    pub fn transience(&self) -> Transience {
        if self.is_stop() || self.is_invalid_token() {
            Transience::Permanent
        } else {
            Transience::Retryable
        }
    }
}

/// Failure to turn a raw inbound frame into a typed event.
///
/// None of these affect the connection except `Server`, which the manager
/// maps to a server-initiated disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported event type `{event_type}`")]
    UnsupportedEventType { event_type: String },

    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Connection-level error surfaced through `ConnectionState::Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] EngineError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl ClientError {
    pub fn transience(&self) -> Transience {
        match self {
            ClientError::Transport(_) => Transience::Retryable,
            ClientError::Server(e) => e.transience(),
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the canonical errors above.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_code_is_permanent() {
        let err = ServerError::new(1000, "shutting you down");
        assert!(err.is_stop());
        assert_eq!(err.transience(), Transience::Permanent);
    }

    #[test]
    fn token_band_is_permanent() {
        for code in 40..=42 {
            let err = ServerError::new(code, "token expired");
            assert!(err.is_invalid_token());
            assert_eq!(err.transience(), Transience::Permanent);
        }
    }

    #[test]
    fn other_server_errors_are_retryable() {
        let err = ServerError::new(500, "internal");
        assert!(!err.is_stop());
        assert!(!err.is_invalid_token());
        assert!(err.transience().is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = ClientError::Transport(EngineError::new("connection reset"));
        assert!(err.transience().is_retryable());
    }
}
