mod capture;
mod command;

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use safechat_client::{Client, ClientConfig, ClientUpdate};
use safechat_moderation::{SessionNotice, SessionState};
use safechat_sync::Delivery;
use safechat_types::{ChannelId, ChatMessage, MessageId};

use crate::capture::LineCapture;
use crate::command::{Command, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safechat=debug".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let capture = Arc::new(LineCapture::default());
    let mut client = Client::connect(config, capture.clone());
    info!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run(&mut client, &capture, command),
                    Ok(None) => {}
                    Err(e) => println!("! {}", e),
                }
            }
            update = client.next_update() => show(&client, &update),
        }
    }

    client.shutdown().await;
    Ok(())
}

fn run(client: &mut Client, capture: &LineCapture, command: Command) {
    let result = match command {
        Command::Send(text) => client.send_message(client.active_channel(), &text).map(|_| ()),
        Command::Join(stream_id) => client.join_stream(stream_id),
        Command::Leave => client.leave_stream(),
        Command::Live(stream_id) => client.start_broadcast(stream_id),
        Command::End => client.stop_broadcast(),
        Command::Mute => client.stop_speaking(),
        Command::Unmute => client.start_speaking(),
        Command::Say(text) => {
            if !capture.say(&text) {
                println!("! not broadcasting");
            }
            Ok(())
        }
        Command::Warn(message_id, user_id) => {
            let outcome = client.moderator_warn(message_id, user_id);
            println!(
                "* {} has {}/3 warnings{}",
                user_id,
                outcome.count,
                if outcome.restricted { " and is restricted" } else { "" }
            );
            Ok(())
        }
        Command::Restrict(user_id) => {
            client.moderator_restrict(user_id);
            println!("* {} is restricted", user_id);
            Ok(())
        }
        Command::Pending => {
            let channel = client.active_channel();
            let pending = client.state().store().pending_locals(channel, Utc::now());
            if pending.is_empty() {
                println!("* nothing pending in {}", channel);
            }
            for (message, delivery) in pending {
                let label = match delivery {
                    Delivery::Pending => "pending",
                    Delivery::PossiblyLost => "possibly lost, resend to retry",
                };
                println!("{} ({})", render(channel, message), label);
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("! {}", e);
    }
}

fn show(client: &Client, update: &ClientUpdate) {
    match update {
        ClientUpdate::Connection { channel, connected } => {
            println!("* {} {}", channel, if *connected { "connected" } else { "disconnected" });
        }
        ClientUpdate::Messages { channel, summary } => {
            for message in added(client.active_messages(*channel), &summary.added) {
                println!("{}", render(*channel, message));
            }
        }
        ClientUpdate::Warning { count, message, .. } => println!("! warning {}/3: {}", count, message),
        ClientUpdate::Restricted { message, .. } => println!("! {}", message),
        ClientUpdate::Rejected { message, .. } => println!("! {}", message),
        ClientUpdate::Speech(notice) => match notice {
            SessionNotice::StateChanged { to, .. } => println!("* speech {}", state_label(*to)),
            SessionNotice::Warning { count, message } => println!(
                "! speech warning {}/3{}",
                count,
                message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
            ),
            SessionNotice::CaptureUnavailable(reason) => println!("! speech capture unavailable: {}", reason),
            SessionNotice::TranscriptFlagged(text) => println!("! flagged: {}", text),
            SessionNotice::TranscriptClean(_) | SessionNotice::Terminated { .. } => {}
            SessionNotice::ServerError(message) => println!("! moderation: {}", message),
        },
        ClientUpdate::BroadcastEnded { stream_id, reason } => println!(
            "! broadcast on {} ended: {}",
            stream_id,
            reason.as_deref().unwrap_or("stopped by moderation")
        ),
    }
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "paused",
        SessionState::Listening => "listening",
        SessionState::Muted => "muted",
        SessionState::Stopped => "stopped",
    }
}

/// The messages a merge just added, in display order.
fn added<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>, ids: &[MessageId]) -> Vec<&'a ChatMessage> {
    messages.into_iter().filter(|m| ids.contains(&m.id)).collect()
}

fn render(channel: ChannelId, message: &ChatMessage) -> String {
    let scope = match channel {
        ChannelId::Global => String::new(),
        ChannelId::Stream(id) => format!("#{} ", id),
    };
    let flag = if message.flagged { " [flagged]" } else { "" };
    format!(
        "{}[{}] {} <{}> {}{}",
        scope,
        message.timestamp.format("%H:%M:%S"),
        message.id,
        message.author_name,
        message.text,
        flag
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use safechat_types::{StreamId, UserId};

    fn message(id: MessageId, text: &str, secs: u32) -> ChatMessage {
        ChatMessage {
            id,
            channel: ChannelId::Stream(StreamId(3)),
            author_id: UserId(1),
            author_name: "alice".into(),
            text: text.into(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 13, 4, secs).unwrap(),
            flagged: false,
        }
    }

    #[test]
    fn prints_older_history_not_newest_tail() {
        let messages = vec![
            message(MessageId::Confirmed(1), "old one", 1),
            message(MessageId::Confirmed(2), "old two", 2),
            message(MessageId::new_local(), "just typed", 50),
        ];
        let shown: Vec<_> = added(&messages, &[MessageId::Confirmed(1), MessageId::Confirmed(2)])
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(shown, vec!["old one", "old two"]);
    }

    #[test]
    fn renders_stream_messages_with_scope() {
        let mut message = message(MessageId::Confirmed(42), "hi", 5);
        message.flagged = true;
        assert_eq!(
            render(message.channel, &message),
            "#3 [13:04:05] 42 <alice> hi [flagged]"
        );
    }
}
