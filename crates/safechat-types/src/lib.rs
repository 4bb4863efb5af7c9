pub mod endpoints;
pub mod events;
pub mod models;

pub use models::{ChannelId, ChatMessage, MessageId, Origin, StreamId, UserId};
