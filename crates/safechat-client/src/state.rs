use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use safechat_moderation::SessionNotice;
use safechat_sync::{LedgerConfig, MergeSummary, MessageStore, ModerationLedger, ReconcileConfig, WarnOutcome};
use safechat_transport::{ChannelEvent, SocketEvent};
use safechat_types::events::ChatEvent;
use safechat_types::{ChannelId, ChatMessage, MessageId, StreamId, UserId};

use crate::config::ClientContext;

/// Something the UI should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Connection {
        channel: ChannelId,
        connected: bool,
    },
    Messages {
        channel: ChannelId,
        summary: MergeSummary,
    },
    /// A send was blocked and counted against `user_id`.
    Warning {
        channel: ChannelId,
        user_id: UserId,
        count: u32,
        message: String,
        retracted: Option<MessageId>,
    },
    Restricted {
        channel: ChannelId,
        user_id: UserId,
        message: String,
        retracted: Option<MessageId>,
    },
    /// The server refused a send for another reason.
    Rejected {
        channel: ChannelId,
        message: String,
        retracted: Option<MessageId>,
    },
    Speech(SessionNotice),
    BroadcastEnded {
        stream_id: StreamId,
        reason: Option<String>,
    },
}

/// Chat state of one client: the message set and the moderation ledger.
/// Socket-free; the façade feeds it events.
#[derive(Debug)]
pub struct ClientState {
    context: ClientContext,
    store: MessageStore,
    ledger: ModerationLedger,
}

impl ClientState {
    pub fn new(context: ClientContext, reconcile: ReconcileConfig, ledger: LedgerConfig) -> Self {
        Self {
            context,
            store: MessageStore::new(reconcile),
            ledger: ModerationLedger::new(ledger),
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn ledger(&self) -> &ModerationLedger {
        &self.ledger
    }

    /// Messages of `channel`, oldest first.
    pub fn messages(&self, channel: ChannelId) -> Vec<&ChatMessage> {
        self.store.channel_messages(channel)
    }

    pub fn is_restricted(&self) -> bool {
        self.ledger.is_restricted(self.context.user_id)
    }

    /// Echo a message the local user just sent.
    pub fn push_local(&mut self, channel: ChannelId, text: &str, now: DateTime<Utc>) -> MessageId {
        let message = ChatMessage::local(
            channel,
            self.context.user_id,
            self.context.username.as_str(),
            text,
            now,
        );
        self.store.push_local(message)
    }

    pub fn apply(&mut self, event: ChannelEvent) -> ClientUpdate {
        let channel = event.channel;
        let event = match event.event {
            SocketEvent::Opened => return ClientUpdate::Connection { channel, connected: true },
            SocketEvent::Closed => return ClientUpdate::Connection { channel, connected: false },
            SocketEvent::Event(event) => event,
        };

        match event {
            ChatEvent::MessageHistory { messages } => {
                debug!("history for {}: {} messages", channel, messages.len());
                let summary = self.store.apply_snapshot(channel, messages);
                ClientUpdate::Messages { channel, summary }
            }
            ChatEvent::NewMessage { message } => {
                let summary = self.store.apply_new(channel, message);
                ClientUpdate::Messages { channel, summary }
            }
            ChatEvent::Warning {
                warning_count,
                message,
                user_id,
            } => {
                let user_id = user_id.unwrap_or(self.context.user_id);
                let count = self.ledger.record_warning(user_id, warning_count);
                info!("chat warning {} for {}: {}", count, user_id, message);
                ClientUpdate::Warning {
                    channel,
                    user_id,
                    count,
                    message,
                    retracted: self.retract(channel, user_id),
                }
            }
            ChatEvent::Restriction { message, user_id } => {
                let user_id = user_id.unwrap_or(self.context.user_id);
                self.ledger.restrict(user_id);
                ClientUpdate::Restricted {
                    channel,
                    user_id,
                    message,
                    retracted: self.retract(channel, user_id),
                }
            }
            ChatEvent::Error { message } => {
                warn!("chat server error on {}: {}", channel, message);
                let user_id = self.context.user_id;
                ClientUpdate::Rejected {
                    channel,
                    message,
                    retracted: self.retract(channel, user_id),
                }
            }
        }
    }

    /// A moderator flagged `message_id`, written by `user_id`.
    pub fn moderator_warn(&mut self, message_id: MessageId, user_id: UserId) -> WarnOutcome {
        if !self.store.flag_message(message_id) {
            debug!("flagged message {} is not held locally", message_id);
        }
        self.ledger.moderator_warn(user_id)
    }

    pub fn moderator_restrict(&mut self, user_id: UserId) -> bool {
        self.ledger.restrict(user_id)
    }

    fn retract(&mut self, channel: ChannelId, user_id: UserId) -> Option<MessageId> {
        self.store.retract_latest_local(channel, user_id).map(|m| m.id)
    }
}
