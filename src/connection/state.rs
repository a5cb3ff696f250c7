//! Connection lifecycle states and disconnection provenance.

use std::fmt;

use crate::error::{ClientError, ServerError};
use crate::events::event::ConnectionId;

/// Who or what caused a disconnection. Reconnection decisions key off this.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectionSource {
    /// The application asked for the disconnect. Never retried.
    UserInitiated,
    /// The client itself tore the link down (backgrounding, endpoint change).
    SystemInitiated,
    /// The liveness controller gave up waiting for a probe reply.
    NoPongReceived,
    /// The server closed the link, possibly with an error payload.
    ServerInitiated { error: Option<ServerError> },
    /// The connectivity monitor reported the network as gone.
    InternetUnavailable,
}

impl DisconnectionSource {
    /// Whether a disconnect from this source should be retried automatically.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DisconnectionSource::UserInitiated)
    }
}

impl fmt::Display for DisconnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectionSource::UserInitiated => write!(f, "user initiated"),
            DisconnectionSource::SystemInitiated => write!(f, "system initiated"),
            DisconnectionSource::NoPongReceived => write!(f, "no pong received"),
            DisconnectionSource::ServerInitiated { error: Some(err) } => {
                write!(f, "server initiated ({err})")
            }
            DisconnectionSource::ServerInitiated { error: None } => {
                write!(f, "server initiated")
            }
            DisconnectionSource::InternetUnavailable => write!(f, "internet unavailable"),
        }
    }
}

/// The connection lifecycle.
///
/// `WaitingForConnectionId` sits between transport-open and the server's
/// first health check; the link is up but not yet usable for requests that
/// need a connection id.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Connecting,
    WaitingForConnectionId,
    Connected {
        connection_id: ConnectionId,
    },
    Disconnecting {
        source: DisconnectionSource,
    },
    Disconnected {
        source: DisconnectionSource,
        error: Option<ClientError>,
    },
}

impl ConnectionState {
    /// True while a connection attempt or a live connection is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::WaitingForConnectionId
                | ConnectionState::Connected { .. }
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            ConnectionState::Connected { connection_id } => Some(connection_id),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "uninitialized"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::WaitingForConnectionId => write!(f, "waiting for connection id"),
            ConnectionState::Connected { connection_id } => {
                write!(f, "connected ({connection_id})")
            }
            ConnectionState::Disconnecting { source } => write!(f, "disconnecting: {source}"),
            ConnectionState::Disconnected { source, error: Some(err) } => {
                write!(f, "disconnected: {source} ({err})")
            }
            ConnectionState::Disconnected { source, error: None } => {
                write!(f, "disconnected: {source}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::WaitingForConnectionId.is_active());
        assert!(ConnectionState::Connected {
            connection_id: ConnectionId::from("c1"),
        }
        .is_active());

        assert!(!ConnectionState::Uninitialized.is_active());
        assert!(!ConnectionState::Disconnecting {
            source: DisconnectionSource::UserInitiated,
        }
        .is_active());
        assert!(!ConnectionState::Disconnected {
            source: DisconnectionSource::UserInitiated,
            error: None,
        }
        .is_active());
    }

    #[test]
    fn connection_id_only_when_connected() {
        let state = ConnectionState::Connected {
            connection_id: ConnectionId::from("c1"),
        };
        assert_eq!(state.connection_id(), Some(&ConnectionId::from("c1")));
        assert_eq!(ConnectionState::Connecting.connection_id(), None);
    }

    #[test]
    fn only_user_initiated_disconnects_are_final() {
        assert!(!DisconnectionSource::UserInitiated.is_retryable());
        assert!(DisconnectionSource::SystemInitiated.is_retryable());
        assert!(DisconnectionSource::NoPongReceived.is_retryable());
        assert!(DisconnectionSource::ServerInitiated { error: None }.is_retryable());
        assert!(DisconnectionSource::InternetUnavailable.is_retryable());
    }
}
