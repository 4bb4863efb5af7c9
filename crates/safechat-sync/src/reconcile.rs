use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use safechat_types::events::WireMessage;
use safechat_types::{ChannelId, ChatMessage, MessageId};

/// A confirmation retires a local echo only if their timestamps are closer
/// than this.
pub const DEFAULT_MATCH_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    pub match_window: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            match_window: DEFAULT_MATCH_WINDOW,
        }
    }
}

/// True when `a` and `b` are strictly closer than `window`.
pub(crate) fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    let gap = (a - b).num_milliseconds().unsigned_abs();
    u128::from(gap) < window.as_millis()
}

/// Merge a server snapshot for `target` into the full cross-channel set.
///
/// Messages outside `target` pass through untouched. Inside it, the snapshot
/// replaces any confirmed message with the same id, and every local echo
/// with a matching `(author_name, text)` confirmation inside the window is
/// retired. The result is stably sorted by timestamp.
pub fn merge(
    all: Vec<ChatMessage>,
    snapshot: Vec<WireMessage>,
    target: ChannelId,
    config: &ReconcileConfig,
) -> Vec<ChatMessage> {
    let mut incoming_ids = HashSet::with_capacity(snapshot.len());
    let mut incoming = Vec::with_capacity(snapshot.len());

    for wire in snapshot {
        if let Some(declared) = wire.declared_channel() {
            if declared != target {
                debug!(
                    "dropping message {} declared for {} while merging {}",
                    wire.id, declared, target
                );
                continue;
            }
        }
        if !incoming_ids.insert(wire.id) {
            continue;
        }
        incoming.push(wire.into_confirmed(target));
    }

    let (in_channel, mut merged): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|m| m.channel == target);

    let retained: Vec<ChatMessage> = in_channel
        .into_iter()
        .filter(|held| match held.id {
            MessageId::Confirmed(id) => !incoming_ids.contains(&id),
            MessageId::Local(_) => !incoming.iter().any(|confirmed| {
                confirmed.author_name == held.author_name
                    && confirmed.text == held.text
                    && within(confirmed.timestamp, held.timestamp, config.match_window)
            }),
        })
        .collect();

    merged.reserve(incoming.len() + retained.len());
    merged.extend(incoming);
    merged.extend(retained);

    // `sort_by_key` is stable: equal timestamps keep their relative order.
    merged.sort_by_key(|m| m.timestamp);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use safechat_types::{StreamId, UserId};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_800_000_000_000 + ms).unwrap()
    }

    fn wire(id: u64, name: &str, text: &str, ms: i64) -> WireMessage {
        WireMessage {
            id,
            user_id: UserId(1),
            username: name.into(),
            text: text.into(),
            timestamp: at(ms),
            is_flagged: false,
            stream_id: None,
            toxicity_score: None,
        }
    }

    fn local(channel: ChannelId, name: &str, text: &str, ms: i64) -> ChatMessage {
        ChatMessage::local(channel, UserId(1), name, text, at(ms))
    }

    fn cfg() -> ReconcileConfig {
        ReconcileConfig::default()
    }

    #[test]
    fn confirmation_retires_local_echo() {
        let all = vec![local(ChannelId::Global, "alice", "hi", 1000)];
        let merged = merge(all, vec![wire(42, "alice", "hi", 1005)], ChannelId::Global, &cfg());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, MessageId::Confirmed(42));
    }

    #[test]
    fn confirmation_outside_window_keeps_local() {
        let all = vec![local(ChannelId::Global, "alice", "hi", 0)];
        let merged = merge(all, vec![wire(42, "alice", "hi", 5000)], ChannelId::Global, &cfg());

        assert_eq!(merged.len(), 2);
        assert!(merged[0].is_local());
    }

    #[test]
    fn refetch_does_not_duplicate_confirmed() {
        let snapshot = vec![wire(1, "bob", "a", 10), wire(2, "bob", "b", 20)];
        let once = merge(Vec::new(), snapshot.clone(), ChannelId::Global, &cfg());
        let twice = merge(once.clone(), snapshot, ChannelId::Global, &cfg());

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn duplicate_ids_inside_snapshot_collapse() {
        let snapshot = vec![wire(9, "bob", "a", 10), wire(9, "bob", "a", 10)];
        let merged = merge(Vec::new(), snapshot, ChannelId::Global, &cfg());
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn other_channels_pass_through() {
        let stream = ChannelId::Stream(StreamId(5));
        let other = vec![
            local(stream, "carol", "x", 100),
            local(stream, "carol", "hi", 200),
        ];
        let merged = merge(
            other.clone(),
            vec![wire(1, "carol", "hi", 201)],
            ChannelId::Global,
            &cfg(),
        );

        let untouched: Vec<_> = merged.into_iter().filter(|m| m.channel == stream).collect();
        assert_eq!(untouched, other);
    }

    #[test]
    fn entries_declared_for_another_stream_are_dropped() {
        let mut foreign = wire(3, "dave", "yo", 10);
        foreign.stream_id = Some(StreamId(8));
        let merged = merge(Vec::new(), vec![foreign], ChannelId::Global, &cfg());
        assert!(merged.is_empty());
    }

    #[test]
    fn result_is_stably_sorted() {
        let all = vec![
            local(ChannelId::Global, "alice", "first", 300),
            local(ChannelId::Global, "alice", "second", 300),
        ];
        let merged = merge(
            all,
            vec![wire(1, "bob", "early", 100), wire(2, "bob", "same", 300)],
            ChannelId::Global,
            &cfg(),
        );

        let texts: Vec<_> = merged.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["early", "same", "first", "second"]);
    }

    #[test]
    fn one_confirmation_retires_every_matching_echo() {
        let all = vec![
            local(ChannelId::Global, "alice", "gg", 0),
            local(ChannelId::Global, "alice", "gg", 50),
        ];
        let merged = merge(all, vec![wire(7, "alice", "gg", 60)], ChannelId::Global, &cfg());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, MessageId::Confirmed(7));
    }
}
