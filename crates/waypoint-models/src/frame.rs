use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → server socket frames, discriminated by `type`.
///
/// Unrecognized `type` values land on [`InboundFrame::Unknown`] instead of
/// failing deserialization, so the session can answer with an in-band error
/// and stay open.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Ping,
    Typing {
        #[serde(default)]
        typing: bool,
    },
    Message {
        text: String,
        #[serde(default)]
        reply_to_id: Option<i64>,
        #[serde(default)]
        media_urls: Vec<String>,
    },
    MarkRead,
    Reaction {
        message_id: i64,
        reaction: String,
    },
    /// Place-chat only: send a DM to another occupant of the room.
    ReplyPrivate {
        target_user_id: i64,
        text: String,
        #[serde(default)]
        context: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Server → client socket frames. Every frame carries a server timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Pong {
        timestamp: DateTime<Utc>,
    },
    Typing {
        user_id: i64,
        typing: bool,
        timestamp: DateTime<Utc>,
    },
    Message {
        message: MessagePayload,
        timestamp: DateTime<Utc>,
    },
    ReadReceipt {
        user_id: i64,
        last_read_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    Reaction {
        message_id: i64,
        user_id: i64,
        reaction: String,
        timestamp: DateTime<Utc>,
    },
    Presence {
        user_id: i64,
        online: bool,
        timestamp: DateTime<Utc>,
    },
    /// Confirmation to the initiator of a `reply_private`.
    ReplyPrivateSent {
        thread_id: i64,
        message: MessagePayload,
        timestamp: DateTime<Utc>,
    },
    /// Out-of-band DM delivery to a user's other connections.
    DmNotification {
        thread_id: i64,
        message: MessagePayload,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: ErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundFrame {
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn typing(user_id: i64, typing: bool) -> Self {
        Self::Typing {
            user_id,
            typing,
            timestamp: Utc::now(),
        }
    }

    pub fn message(message: MessagePayload) -> Self {
        Self::Message {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn read_receipt(user_id: i64, last_read_at: DateTime<Utc>) -> Self {
        Self::ReadReceipt {
            user_id,
            last_read_at,
            timestamp: Utc::now(),
        }
    }

    pub fn presence(user_id: i64, online: bool) -> Self {
        Self::Presence {
            user_id,
            online,
            timestamp: Utc::now(),
        }
    }

    pub fn reaction(message_id: i64, user_id: i64, reaction: impl Into<String>) -> Self {
        Self::Reaction {
            message_id,
            user_id,
            reaction: reaction.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn reply_private_sent(thread_id: i64, message: MessagePayload) -> Self {
        Self::ReplyPrivateSent {
            thread_id,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn dm_notification(thread_id: i64, message: MessagePayload) -> Self {
        Self::DmNotification {
            thread_id,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-band error codes; the session continues after any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BlankText,
    TextTooLong,
    Blocked,
    InvalidReplyTarget,
    TargetNotPresent,
    UnknownType,
    NotSupported,
    Storage,
}

/// Message as it appears on the wire. Soft-deleted messages keep their id
/// and position but carry no text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub sender_id: i64,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_parse_by_type_tag() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"typing","typing":true}"#).unwrap();
        assert_eq!(frame, InboundFrame::Typing { typing: true });

        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"message","text":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Message {
                text: "hi".into(),
                reply_to_id: None,
                media_urls: vec![],
            }
        );
    }

    #[test]
    fn unknown_type_is_an_explicit_variant() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"teleport","x":1}"#).unwrap();
        assert_eq!(frame, InboundFrame::Unknown);
    }

    #[test]
    fn outbound_frames_tag_and_timestamp() {
        let json = serde_json::to_value(OutboundFrame::pong()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].is_string());

        let json = serde_json::to_value(OutboundFrame::error(
            ErrorCode::BlankText,
            "message text required",
        ))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "blank_text");
    }
}
