//! Typed events delivered over the realtime connection.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(
    /// Server-assigned identifier of one realtime session, carried by the
    /// session-established event and echoed on REST calls.
    ConnectionId
);
id_newtype!(ChannelId);
id_newtype!(UserId);
id_newtype!(MessageId);

/// A decoded server event.
///
/// `HealthCheck` is the session-established event: it is consumed by the
/// connection manager (state transition + liveness reply) and never reaches
/// pipeline stages or subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    HealthCheck {
        connection_id: ConnectionId,
    },
    MessageNew {
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        text: String,
        /// Unread counter for the current user, filled in by the read-state
        /// pipeline stage; `None` until that stage runs.
        unread_count: Option<u64>,
    },
    MessageRead {
        channel_id: ChannelId,
        user_id: UserId,
    },
    TypingStart {
        channel_id: ChannelId,
        user_id: UserId,
    },
    TypingStop {
        channel_id: ChannelId,
        user_id: UserId,
    },
    ReactionNew {
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        reaction: String,
    },
    MemberAdded {
        channel_id: ChannelId,
        user_id: UserId,
    },
}

impl Event {
    /// Wire name of this event's type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::HealthCheck { .. } => "health.check",
            Event::MessageNew { .. } => "message.new",
            Event::MessageRead { .. } => "message.read",
            Event::TypingStart { .. } => "typing.start",
            Event::TypingStop { .. } => "typing.stop",
            Event::ReactionNew { .. } => "reaction.new",
            Event::MemberAdded { .. } => "member.added",
        }
    }

    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Event::HealthCheck { .. } => None,
            Event::MessageNew { channel_id, .. }
            | Event::MessageRead { channel_id, .. }
            | Event::TypingStart { channel_id, .. }
            | Event::TypingStop { channel_id, .. }
            | Event::ReactionNew { channel_id, .. }
            | Event::MemberAdded { channel_id, .. } => Some(channel_id),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Event::HealthCheck { .. } => None,
            Event::MessageNew { user_id, .. }
            | Event::MessageRead { user_id, .. }
            | Event::TypingStart { user_id, .. }
            | Event::TypingStop { user_id, .. }
            | Event::ReactionNew { user_id, .. }
            | Event::MemberAdded { user_id, .. } => Some(user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names_match_wire_names() {
        let event = Event::TypingStart {
            channel_id: ChannelId::from("general"),
            user_id: UserId::from("ada"),
        };
        assert_eq!(event.event_type(), "typing.start");
        assert_eq!(event.channel_id(), Some(&ChannelId::from("general")));
        assert_eq!(event.user_id(), Some(&UserId::from("ada")));
    }

    #[test]
    fn health_check_has_no_channel() {
        let event = Event::HealthCheck {
            connection_id: ConnectionId::from("c-1"),
        };
        assert_eq!(event.channel_id(), None);
        assert_eq!(event.user_id(), None);
    }
}
