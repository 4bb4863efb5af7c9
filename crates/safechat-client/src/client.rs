use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use safechat_moderation::{CaptureProvider, SessionHandle, SessionNotice, SessionStatus, spawn_session};
use safechat_sync::WarnOutcome;
use safechat_transport::{ChannelEvent, ChannelHandle, ChatTransport, ConnectionStatus};
use safechat_types::{ChannelId, ChatMessage, MessageId, StreamId, UserId};

use crate::config::{ClientConfig, ClientContext};
use crate::error::ClientError;
use crate::state::{ClientState, ClientUpdate};

struct Broadcast {
    stream_id: StreamId,
    /// Absent when speech capture is unavailable on this platform.
    session: Option<SessionHandle>,
}

/// One logged-in user's connection to the chat server.
///
/// Keeps the global channel open for its whole life, at most one stream
/// channel, and the speech session while broadcasting. Call
/// [`next_update`](Self::next_update) in a loop to apply inbound events.
pub struct Client {
    config: ClientConfig,
    chat: ChatTransport,
    state: ClientState,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    global: ChannelHandle,
    stream: Option<ChannelHandle>,
    broadcast: Option<Broadcast>,
    capture: Arc<dyn CaptureProvider>,
    pending: VecDeque<ClientUpdate>,
}

impl Client {
    /// Connect to global chat. Must be called inside a tokio runtime.
    pub fn connect(config: ClientConfig, capture: Arc<dyn CaptureProvider>) -> Self {
        let chat = ChatTransport::new(config.transport.clone());
        let state = ClientState::new(config.context.clone(), config.reconcile, config.ledger);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let global = chat.connect(ChannelId::Global, events_tx.clone());

        info!(
            "client for {} ({}) connecting to {}",
            config.context.username, config.context.user_id, config.transport.server_url
        );

        Self {
            config,
            chat,
            state,
            events_tx,
            events_rx,
            global,
            stream: None,
            broadcast: None,
            capture,
            pending: VecDeque::new(),
        }
    }

    pub fn context(&self) -> &ClientContext {
        self.state.context()
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn joined_stream(&self) -> Option<StreamId> {
        self.stream.as_ref().and_then(|h| h.channel().stream_id())
    }

    pub fn broadcasting(&self) -> Option<StreamId> {
        self.broadcast.as_ref().map(|b| b.stream_id)
    }

    /// The channel plain sends go to: the joined stream, else global.
    pub fn active_channel(&self) -> ChannelId {
        ChannelId::from_stream(self.joined_stream())
    }

    /// Messages of `channel`, oldest first.
    pub fn active_messages(&self, channel: ChannelId) -> Vec<&ChatMessage> {
        self.state.messages(channel)
    }

    pub fn warning_count(&self, user_id: UserId) -> u32 {
        self.state.ledger().warning_count(user_id)
    }

    pub fn is_restricted(&self, user_id: UserId) -> bool {
        self.state.ledger().is_restricted(user_id)
    }

    /// `None` if `channel` is not open on this client.
    pub fn connection_status(&self, channel: ChannelId) -> Option<ConnectionStatus> {
        self.handle(channel).map(ChannelHandle::status)
    }

    pub fn speech_status(&self) -> Option<SessionStatus> {
        self.broadcast
            .as_ref()
            .and_then(|b| b.session.as_ref())
            .map(SessionHandle::status)
    }

    /// Send `text` to `channel` and echo it locally.
    pub fn send_message(&mut self, channel: ChannelId, text: &str) -> Result<MessageId, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if self.state.is_restricted() {
            debug!("send blocked: local user is restricted");
            return Err(ClientError::Restricted);
        }

        let handle = self.handle(channel).ok_or(ClientError::NoStreamJoined)?;
        let ctx = self.state.context();
        handle.send(ctx.user_id, &ctx.username, text)?;

        Ok(self.state.push_local(channel, text, Utc::now()))
    }

    /// Open the chat channel of `stream_id`, leaving any other stream.
    pub fn join_stream(&mut self, stream_id: StreamId) -> Result<(), ClientError> {
        if self.joined_stream() == Some(stream_id) {
            return Ok(());
        }
        if self.broadcast.is_some() {
            return Err(ClientError::AlreadyBroadcasting);
        }
        self.close_stream();

        let handle = self.chat.connect(ChannelId::Stream(stream_id), self.events_tx.clone());
        info!("joined stream {}", stream_id);
        self.stream = Some(handle);
        Ok(())
    }

    /// Close the stream channel. Ends the broadcast first if there is one.
    pub fn leave_stream(&mut self) -> Result<(), ClientError> {
        if self.stream.is_none() {
            return Err(ClientError::NoStreamJoined);
        }
        if self.broadcast.is_some() {
            self.end_broadcast();
        }
        self.close_stream();
        Ok(())
    }

    /// Go live on `stream_id`: join its chat and start speech moderation.
    pub fn start_broadcast(&mut self, stream_id: StreamId) -> Result<(), ClientError> {
        if self.broadcast.is_some() {
            return Err(ClientError::AlreadyBroadcasting);
        }
        self.join_stream(stream_id)?;

        let user_id = self.state.context().user_id;
        let session = match spawn_session(
            &self.config.transport,
            self.config.session,
            stream_id,
            user_id,
            self.capture.as_ref(),
        ) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("broadcasting {} without speech moderation: {}", stream_id, e);
                self.pending
                    .push_back(ClientUpdate::Speech(SessionNotice::CaptureUnavailable(e.to_string())));
                None
            }
        };

        info!("broadcasting on stream {}", stream_id);
        self.broadcast = Some(Broadcast { stream_id, session });
        Ok(())
    }

    /// End the broadcast and leave its stream.
    pub fn stop_broadcast(&mut self) -> Result<(), ClientError> {
        if self.broadcast.is_none() {
            return Err(ClientError::NotBroadcasting);
        }
        self.end_broadcast();
        self.close_stream();
        Ok(())
    }

    pub fn start_speaking(&self) -> Result<(), ClientError> {
        let broadcast = self.broadcast.as_ref().ok_or(ClientError::NotBroadcasting)?;
        match &broadcast.session {
            Some(session) => session.start_speaking(),
            None => debug!("speech capture unavailable, ignoring start"),
        }
        Ok(())
    }

    pub fn stop_speaking(&self) -> Result<(), ClientError> {
        let broadcast = self.broadcast.as_ref().ok_or(ClientError::NotBroadcasting)?;
        if let Some(session) = &broadcast.session {
            session.stop_speaking();
        }
        Ok(())
    }

    pub fn moderator_warn(&mut self, message_id: MessageId, user_id: UserId) -> WarnOutcome {
        let outcome = self.state.moderator_warn(message_id, user_id);
        info!(
            "moderator warned {} ({} warnings{})",
            user_id,
            outcome.count,
            if outcome.restricted { ", restricted" } else { "" }
        );
        outcome
    }

    pub fn moderator_restrict(&mut self, user_id: UserId) -> bool {
        self.state.moderator_restrict(user_id)
    }

    /// Wait for the next inbound event, apply it and describe the change.
    pub async fn next_update(&mut self) -> ClientUpdate {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return update;
            }

            let session = self.broadcast.as_mut().and_then(|b| b.session.as_mut());

            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if let Some(update) = self.on_channel_event(event) {
                        return update;
                    }
                }
                notice = next_notice(session) => {
                    match notice {
                        Some(notice) => return self.on_notice(notice),
                        None => {
                            debug!("speech session finished");
                            if let Some(broadcast) = self.broadcast.as_mut() {
                                broadcast.session = None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Close every connection and wait for their tasks.
    pub async fn shutdown(mut self) {
        if let Some(session) = self.broadcast.take().and_then(|b| b.session) {
            session.shutdown().await;
        }
        if let Some(stream) = self.stream.take() {
            stream.shutdown().await;
        }
        self.global.shutdown().await;
    }

    fn handle(&self, channel: ChannelId) -> Option<&ChannelHandle> {
        match channel {
            ChannelId::Global => Some(&self.global),
            ChannelId::Stream(_) => self.stream.as_ref().filter(|h| h.channel() == channel),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) -> Option<ClientUpdate> {
        if self.handle(event.channel).is_none() {
            trace!("dropping event from closed channel {}", event.channel);
            return None;
        }
        Some(self.state.apply(event))
    }

    fn on_notice(&mut self, notice: SessionNotice) -> ClientUpdate {
        let SessionNotice::Terminated { reason } = notice else {
            return ClientUpdate::Speech(notice);
        };

        let stream_id = self.broadcast.as_ref().map(|b| b.stream_id);
        self.end_broadcast();
        self.close_stream();
        match stream_id {
            Some(stream_id) => {
                warn!("broadcast on {} ended by moderation", stream_id);
                ClientUpdate::BroadcastEnded { stream_id, reason }
            }
            None => ClientUpdate::Speech(SessionNotice::Terminated { reason }),
        }
    }

    fn end_broadcast(&mut self) {
        if let Some(broadcast) = self.broadcast.take() {
            if let Some(session) = broadcast.session {
                session.stop();
            }
            info!("broadcast on {} ended", broadcast.stream_id);
        }
    }

    fn close_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            handle.dispose();
            info!("left stream channel {}", handle.channel());
        }
    }
}

async fn next_notice(session: Option<&mut SessionHandle>) -> Option<SessionNotice> {
    match session {
        Some(session) => session.recv_notice().await,
        None => std::future::pending().await,
    }
}
