use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{ChannelId, ChatMessage, MessageId, StreamId, UserId};

/// A message as the chat server serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: u64,
    pub user_id: UserId,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toxicity_score: Option<f64>,
}

impl WireMessage {
    /// The channel this entry claims to belong to, if it says so at all.
    /// Global-chat payloads omit `stream_id`, so `None` is not the same as
    /// an explicit global marker.
    pub fn declared_channel(&self) -> Option<ChannelId> {
        self.stream_id.map(ChannelId::Stream)
    }

    /// Converts into a confirmed message scoped to `channel`.
    pub fn into_confirmed(self, channel: ChannelId) -> ChatMessage {
        ChatMessage {
            id: MessageId::Confirmed(self.id),
            channel,
            author_id: self.user_id,
            author_name: self.username,
            text: self.text,
            timestamp: self.timestamp,
            flagged: self.is_flagged,
        }
    }
}

/// Events sent by the chat server on a global or stream chat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Recent history, sent once per (re)connect
    MessageHistory { messages: Vec<WireMessage> },

    /// A message was accepted and broadcast
    NewMessage { message: WireMessage },

    /// The last send was blocked and counted against the sender
    Warning {
        warning_count: u32,
        message: String,
        #[serde(default)]
        user_id: Option<UserId>,
    },

    /// The sender has been restricted from chat
    Restriction {
        message: String,
        #[serde(default)]
        user_id: Option<UserId>,
    },

    /// Server refused or failed to process a command
    Error { message: String },
}

/// Commands sent FROM client TO the chat server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    ChatMessage {
        username: String,
        user_id: UserId,
        message: String,
    },
}

/// Events sent by the speech moderation server to a broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationEvent {
    /// A transcript was flagged; the count is the server's running total
    SpeechWarning {
        warning_number: u32,
        #[serde(default)]
        message: Option<String>,
    },

    /// Speech is muted for `timeout_duration` seconds
    SpeechTimeout {
        warning_number: u32,
        timeout_duration: u64,
        #[serde(default)]
        message: Option<String>,
    },

    /// The broadcast was ended by the server
    StreamStopped {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// The user tried to speak while a timeout is still running
    TimeoutActive {
        #[serde(default)]
        timeout_remaining: Option<u64>,
    },

    /// A timeout ran out server-side
    TimeoutExpired {
        #[serde(deserialize_with = "lenient_id")]
        stream_id: u64,
        #[serde(deserialize_with = "lenient_id")]
        user_id: u64,
    },

    /// Verdict detail for a flagged transcript
    SpeechToxic {
        transcript: String,
        #[serde(default)]
        details: serde_json::Value,
    },

    /// A transcript passed moderation
    SpeechClean { transcript: String },

    /// Another participant was timed out
    UserTimedOut {
        #[serde(deserialize_with = "lenient_id")]
        user_id: u64,
        duration: u64,
    },

    Error { message: String },
}

impl ModerationEvent {
    /// True when this expiry targets the given (stream, user) session.
    pub fn expires(&self, stream: StreamId, user: UserId) -> bool {
        matches!(
            self,
            Self::TimeoutExpired { stream_id, user_id }
                if *stream_id == stream.0 && *user_id == user.0
        )
    }
}

/// Commands sent FROM a broadcaster TO the speech moderation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationCommand {
    SpeechTranscript {
        transcript: String,
        user_id: UserId,
        stream_id: StreamId,
        timestamp: DateTime<Utc>,
    },
}

/// Ids in moderation payloads arrive as numbers or numeric strings.
fn lenient_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_history_from_server_shape() {
        let raw = r#"{
            "type": "message_history",
            "messages": [{
                "id": 7, "user_id": 3, "username": "alice", "text": "hi",
                "is_flagged": false, "toxicity_score": 0.01,
                "timestamp": "2026-10-14T12:00:00.250000+00:00"
            }]
        }"#;
        let event: ChatEvent = serde_json::from_str(raw).unwrap();
        let ChatEvent::MessageHistory { messages } = event else {
            panic!("wrong variant");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].username, "alice");
        assert_eq!(messages[0].declared_channel(), None);

        let msg = messages[0].clone().into_confirmed(ChannelId::Global);
        assert_eq!(msg.id, MessageId::Confirmed(7));
        assert!(!msg.is_local());
    }

    #[test]
    fn warning_without_user_id() {
        let raw = r#"{"type":"warning","warning_count":2,"message":"Warning 2/3"}"#;
        let event: ChatEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ChatEvent::Warning {
                warning_count: 2,
                message: "Warning 2/3".into(),
                user_id: None,
            }
        );
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let raw = r#"{"type":"stream_update","stream":{}}"#;
        assert!(serde_json::from_str::<ChatEvent>(raw).is_err());
    }

    #[test]
    fn chat_command_wire_shape() {
        let cmd = ChatCommand::ChatMessage {
            username: "alice".into(),
            user_id: UserId(3),
            message: "hello".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "chat_message");
        assert_eq!(json["user_id"], 3);
        assert_eq!(json["message"], "hello");
    }

    #[test]
    fn timeout_expired_accepts_string_ids() {
        let raw = r#"{"type":"timeout_expired","stream_id":"12","user_id":9}"#;
        let event: ModerationEvent = serde_json::from_str(raw).unwrap();
        assert!(event.expires(StreamId(12), UserId(9)));
        assert!(!event.expires(StreamId(12), UserId(10)));
    }

    #[test]
    fn speech_timeout_decodes() {
        let raw = r#"{"type":"speech_timeout","warning_number":2,"timeout_duration":60,
                      "message":"You have been timed out for 60 seconds"}"#;
        let event: ModerationEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            event,
            ModerationEvent::SpeechTimeout { warning_number: 2, timeout_duration: 60, .. }
        ));
    }
}
