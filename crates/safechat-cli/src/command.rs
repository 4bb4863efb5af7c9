use anyhow::{Context, bail};

use safechat_types::{MessageId, StreamId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text for the active channel.
    Send(String),
    Join(StreamId),
    Leave,
    Live(StreamId),
    End,
    Mute,
    Unmute,
    Say(String),
    Warn(MessageId, UserId),
    Restrict(UserId),
    /// List unconfirmed sends in the active channel.
    Pending,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                  send to the active channel
  /join <stream>          open a stream's chat
  /leave                  close the stream chat
  /live <stream>          start broadcasting on a stream
  /end                    stop broadcasting
  /mute, /unmute          pause or resume speech capture
  /say <text>             speak a line into the capture engine
  /warn <message> <user>  moderator warning
  /restrict <user>        moderator restriction
  /pending                unconfirmed sends in the active channel
  /quit";

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Send(line.to_string())));
        };

        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();
        let mut words = args.split_whitespace();

        let command = match name {
            "join" => Command::Join(StreamId(number(words.next(), "stream id")?)),
            "leave" => Command::Leave,
            "live" => Command::Live(StreamId(number(words.next(), "stream id")?)),
            "end" => Command::End,
            "mute" => Command::Mute,
            "unmute" => Command::Unmute,
            "say" => {
                if args.is_empty() {
                    bail!("usage: /say <text>");
                }
                Command::Say(args.to_string())
            }
            "warn" => {
                let message = number(words.next(), "message id")?;
                let user = number(words.next(), "user id")?;
                Command::Warn(MessageId::Confirmed(message), UserId(user))
            }
            "restrict" => Command::Restrict(UserId(number(words.next(), "user id")?)),
            "pending" => Command::Pending,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command /{} (try /help)", other),
        };
        Ok(Some(command))
    }
}

fn number(word: Option<&str>, what: &str) -> anyhow::Result<u64> {
    let word = word.with_context(|| format!("missing {}", what))?;
    word.parse().with_context(|| format!("invalid {}: {}", what, word))
}
