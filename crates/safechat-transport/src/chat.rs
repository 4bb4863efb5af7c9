use tokio::sync::{mpsc, watch};
use tracing::debug;

use safechat_types::endpoints::chat_url;
use safechat_types::events::{ChatCommand, ChatEvent};
use safechat_types::{ChannelId, UserId};

use crate::error::TransportError;
use crate::socket::{ConnectionStatus, SocketEvent, SocketHandle, TransportConfig, spawn_socket};

/// A chat socket event tagged with the channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub event: SocketEvent<ChatEvent>,
}

/// Opens chat channel connections against one server.
#[derive(Debug, Clone, Default)]
pub struct ChatTransport {
    config: TransportConfig,
}

impl ChatTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect to `channel`, forwarding its events to `events`.
    pub fn connect(&self, channel: ChannelId, events: mpsc::UnboundedSender<ChannelEvent>) -> ChannelHandle {
        self.connect_with(channel, move |event| {
            let _ = events.send(event);
        })
    }

    /// Connect to `channel`, calling `handler` for each event in arrival order.
    pub fn connect_with<F>(&self, channel: ChannelId, mut handler: F) -> ChannelHandle
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let url = chat_url(&self.config.server_url, channel);
        debug!("opening chat channel {} at {}", channel, url);

        let socket = spawn_socket(url, &self.config, move |event| {
            handler(ChannelEvent { channel, event });
        });

        ChannelHandle { channel, socket }
    }
}

/// One open chat channel. Dropping it disposes the connection.
pub struct ChannelHandle {
    channel: ChannelId,
    socket: SocketHandle,
}

impl ChannelHandle {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Send a chat message. Fails with `NotConnected` if the socket is not
    /// open; the message is not queued.
    pub fn send(&self, author_id: UserId, author_name: &str, text: &str) -> Result<(), TransportError> {
        self.socket.send_json(&ChatCommand::ChatMessage {
            username: author_name.to_string(),
            user_id: author_id,
            message: text.to_string(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.socket.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.socket.watch_status()
    }

    pub fn dispose(&self) {
        self.socket.dispose();
    }

    pub async fn shutdown(self) {
        self.socket.shutdown().await;
    }
}
