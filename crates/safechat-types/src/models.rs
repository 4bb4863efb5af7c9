use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Identifier of a live stream (and of its chat channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical message scope: the singleton global chat or one stream's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Global,
    Stream(StreamId),
}

impl ChannelId {
    /// Maps the wire representation (`stream_id` absent or null = global).
    pub fn from_stream(stream_id: Option<StreamId>) -> Self {
        match stream_id {
            Some(id) => Self::Stream(id),
            None => Self::Global,
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Self::Global => None,
            Self::Stream(id) => Some(*id),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Stream(id) => write!(f, "stream:{}", id),
        }
    }
}

/// Where a message in the local set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Echoed optimistically on send, not yet acknowledged by the server.
    Local,
    /// Acknowledged by the server and carrying its id.
    Confirmed,
}

/// Message identity. The variant doubles as the message's origin, so a
/// local token can never be mistaken for a server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum MessageId {
    Local(Uuid),
    Confirmed(u64),
}

impl MessageId {
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn origin(&self) -> Origin {
        match self {
            Self::Local(_) => Origin::Local,
            Self::Confirmed(_) => Origin::Confirmed,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(token) => write!(f, "local-{}", token),
            Self::Confirmed(id) => write!(f, "{}", id),
        }
    }
}

/// A chat message as held by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub flagged: bool,
}

impl ChatMessage {
    /// Builds an optimistic echo of a message the local user just sent.
    pub fn local(
        channel: ChannelId,
        author_id: UserId,
        author_name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new_local(),
            channel,
            author_id,
            author_name: author_name.into(),
            text: text.into(),
            timestamp,
            flagged: false,
        }
    }

    pub fn origin(&self) -> Origin {
        self.id.origin()
    }

    pub fn is_local(&self) -> bool {
        self.origin() == Origin::Local
    }
}
