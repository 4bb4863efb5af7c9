use crate::models::{ChannelId, StreamId, UserId};

/// URL of a chat channel's socket, relative to the server base URL.
pub fn chat_url(base: &str, channel: ChannelId) -> String {
    let base = base.trim_end_matches('/');
    match channel {
        ChannelId::Global => format!("{}/ws/chat/", base),
        ChannelId::Stream(id) => format!("{}/ws/chat/{}/", base, id),
    }
}

/// URL of the speech moderation socket for one (stream, user) pair.
pub fn speech_url(base: &str, stream_id: StreamId, user_id: UserId) -> String {
    format!(
        "{}/ws/speech/{}/{}/",
        base.trim_end_matches('/'),
        stream_id,
        user_id
    )
}
