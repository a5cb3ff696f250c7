//! Raw frame decoding.
//!
//! A frame is a JSON object carrying either a `type`-tagged event or an
//! embedded `error` object from the server. Decode failures never touch the
//! connection; the server-error case is reported so the manager can start a
//! server-initiated disconnect.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DecodeError, ServerError};
use crate::events::event::{ChannelId, ConnectionId, Event, MessageId, UserId};

pub trait EventDecoder: Send {
    fn decode(&self, payload: &[u8]) -> Result<Event, DecodeError>;
}

/// Production decoder over serde_json.
#[derive(Debug, Default)]
pub struct JsonEventDecoder;

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Event, DecodeError> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed {
            reason: format!("invalid json: {e}"),
        })?;

        // An error container takes precedence over anything else in the frame.
        if let Some(error) = value.get("error") {
            if error.is_object() {
                let server: ServerError =
                    serde_json::from_value(error.clone()).map_err(|e| DecodeError::Malformed {
                        reason: format!("unreadable error object: {e}"),
                    })?;
                return Err(DecodeError::Server(server));
            }
        }

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed {
                reason: "missing `type` field".into(),
            })?
            .to_string();

        match event_type.as_str() {
            "health.check" => {
                let frame: HealthCheckFrame = payload_from(value, &event_type)?;
                Ok(Event::HealthCheck {
                    connection_id: frame.connection_id,
                })
            }
            "message.new" => {
                let frame: MessageNewFrame = payload_from(value, &event_type)?;
                Ok(Event::MessageNew {
                    channel_id: frame.channel_id,
                    message_id: frame.message_id,
                    user_id: frame.user_id,
                    text: frame.text,
                    unread_count: None,
                })
            }
            "message.read" => {
                let frame: ChannelUserFrame = payload_from(value, &event_type)?;
                Ok(Event::MessageRead {
                    channel_id: frame.channel_id,
                    user_id: frame.user_id,
                })
            }
            "typing.start" => {
                let frame: ChannelUserFrame = payload_from(value, &event_type)?;
                Ok(Event::TypingStart {
                    channel_id: frame.channel_id,
                    user_id: frame.user_id,
                })
            }
            "typing.stop" => {
                let frame: ChannelUserFrame = payload_from(value, &event_type)?;
                Ok(Event::TypingStop {
                    channel_id: frame.channel_id,
                    user_id: frame.user_id,
                })
            }
            "reaction.new" => {
                let frame: ReactionNewFrame = payload_from(value, &event_type)?;
                Ok(Event::ReactionNew {
                    channel_id: frame.channel_id,
                    message_id: frame.message_id,
                    user_id: frame.user_id,
                    reaction: frame.reaction,
                })
            }
            "member.added" => {
                let frame: ChannelUserFrame = payload_from(value, &event_type)?;
                Ok(Event::MemberAdded {
                    channel_id: frame.channel_id,
                    user_id: frame.user_id,
                })
            }
            _ => Err(DecodeError::UnsupportedEventType { event_type }),
        }
    }
}

fn payload_from<T: for<'de> Deserialize<'de>>(
    value: Value,
    event_type: &str,
) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
        reason: format!("bad `{event_type}` payload: {e}"),
    })
}

#[derive(Deserialize)]
struct HealthCheckFrame {
    connection_id: ConnectionId,
}

#[derive(Deserialize)]
struct MessageNewFrame {
    channel_id: ChannelId,
    message_id: MessageId,
    user_id: UserId,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ChannelUserFrame {
    channel_id: ChannelId,
    user_id: UserId,
}

#[derive(Deserialize)]
struct ReactionNewFrame {
    channel_id: ChannelId,
    message_id: MessageId,
    user_id: UserId,
    reaction: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &str) -> Result<Event, DecodeError> {
        JsonEventDecoder.decode(payload.as_bytes())
    }

    #[test]
    fn decodes_health_check() {
        let event = decode(r#"{"type":"health.check","connection_id":"conn-7"}"#).unwrap();
        assert_eq!(
            event,
            Event::HealthCheck {
                connection_id: ConnectionId::from("conn-7"),
            }
        );
    }

    #[test]
    fn decodes_message_new_without_counts() {
        let event = decode(
            r#"{"type":"message.new","channel_id":"general","message_id":"m1","user_id":"ada","text":"hi"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::MessageNew {
                channel_id: ChannelId::from("general"),
                message_id: MessageId::from("m1"),
                user_id: UserId::from("ada"),
                text: "hi".into(),
                unread_count: None,
            }
        );
    }

    #[test]
    fn decodes_typing_events() {
        let start = decode(r#"{"type":"typing.start","channel_id":"c","user_id":"u"}"#).unwrap();
        let stop = decode(r#"{"type":"typing.stop","channel_id":"c","user_id":"u"}"#).unwrap();
        assert_eq!(start.event_type(), "typing.start");
        assert_eq!(stop.event_type(), "typing.stop");
    }

    #[test]
    fn unknown_type_is_unsupported_not_malformed() {
        let err = decode(r#"{"type":"channel.frozen","channel_id":"c"}"#).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedEventType {
                event_type: "channel.frozen".into(),
            }
        );
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = decode(r#"{"channel_id":"c"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode("{nope").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn known_type_with_bad_payload_is_malformed() {
        let err = decode(r#"{"type":"message.new","channel_id":"c"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn embedded_error_object_wins() {
        let err = decode(
            r#"{"error":{"code":1000,"message":"stop","status_code":400},"type":"health.check"}"#,
        )
        .unwrap_err();
        match err {
            DecodeError::Server(server) => {
                assert!(server.is_stop());
                assert_eq!(server.status_code, Some(400));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }
}
