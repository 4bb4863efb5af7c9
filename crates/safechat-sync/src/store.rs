use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use safechat_types::events::WireMessage;
use safechat_types::{ChannelId, ChatMessage, MessageId, UserId};

use crate::reconcile::{ReconcileConfig, merge, within};

/// Delivery state of a local echo that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Still inside the reconciliation window.
    Pending,
    /// Older than the window with no confirmation; may have been dropped.
    PossiblyLost,
}

/// What a merge did to the target channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Confirmed messages newly present in the channel, in display order.
    pub added: Vec<MessageId>,
    /// Local echoes retired by a confirmation.
    pub retired: usize,
}

/// Owns the full cross-channel message set. Every change to the set other
/// than moderator flagging and blocked-send retraction goes through
/// [`merge`].
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    config: ReconcileConfig,
}

impl MessageStore {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            messages: Vec::new(),
            config,
        }
    }

    /// Apply a history snapshot received on `channel`.
    pub fn apply_snapshot(&mut self, channel: ChannelId, snapshot: Vec<WireMessage>) -> MergeSummary {
        let known: HashSet<MessageId> = self.in_channel(channel).map(|m| m.id).collect();
        let locals_before = self.in_channel(channel).filter(|m| m.is_local()).count();
        let all = std::mem::take(&mut self.messages);
        self.messages = merge(all, snapshot, channel, &self.config);

        let added = self
            .in_channel(channel)
            .filter(|m| !m.is_local() && !known.contains(&m.id))
            .map(|m| m.id)
            .collect();
        let locals_after = self.in_channel(channel).filter(|m| m.is_local()).count();
        let summary = MergeSummary {
            added,
            retired: locals_before.saturating_sub(locals_after),
        };
        debug!(
            "merged into {}: +{} confirmed, {} local retired",
            channel,
            summary.added.len(),
            summary.retired
        );
        summary
    }

    /// Apply one broadcast message as a single-entry snapshot.
    pub fn apply_new(&mut self, channel: ChannelId, message: WireMessage) -> MergeSummary {
        self.apply_snapshot(channel, vec![message])
    }

    /// Insert an optimistic echo. Returns its local id.
    pub fn push_local(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        let channel = message.channel;
        trace!("local echo {} in {}", id, channel);

        let mut all = std::mem::take(&mut self.messages);
        all.push(message);
        self.messages = merge(all, Vec::new(), channel, &self.config);
        id
    }

    /// Remove the most recent unconfirmed local message by `author` in
    /// `channel`, scanning from the end. Used when the server blocked the
    /// send instead of confirming it.
    pub fn retract_latest_local(&mut self, channel: ChannelId, author: UserId) -> Option<ChatMessage> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.channel == channel && m.is_local() && m.author_id == author)?;
        let removed = self.messages.remove(idx);
        debug!("retracted blocked local message {} from {}", removed.id, author);
        Some(removed)
    }

    /// Mark a message as flagged. Returns false if no such message is held.
    pub fn flag_message(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.flagged = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Messages of one channel, oldest first.
    pub fn channel_messages(&self, channel: ChannelId) -> Vec<&ChatMessage> {
        self.messages.iter().filter(|m| m.channel == channel).collect()
    }

    /// Unconfirmed local echoes in `channel` with their delivery state as of `now`.
    pub fn pending_locals(&self, channel: ChannelId, now: DateTime<Utc>) -> Vec<(&ChatMessage, Delivery)> {
        self.messages
            .iter()
            .filter(|m| m.channel == channel && m.is_local())
            .map(|m| {
                let delivery = if within(now, m.timestamp, self.config.match_window) {
                    Delivery::Pending
                } else {
                    Delivery::PossiblyLost
                };
                (m, delivery)
            })
            .collect()
    }

    fn in_channel(&self, channel: ChannelId) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(move |m| m.channel == channel)
    }
}
