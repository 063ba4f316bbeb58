//! Terminal transport: stdin lines in, stdout replies out.

use async_trait::async_trait;
use chatter_core::mention::{self, Segment};
use chatter_core::{ChatTransport, IncomingMessage, OutgoingReply, TransportResult};

/// Prints replies to stdout.
pub struct StdoutTransport;

#[async_trait]
impl ChatTransport for StdoutTransport {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, reply: OutgoingReply) -> TransportResult<()> {
        println!("[bot] {}", reply.render());
        Ok(())
    }
}

/// Where typed lines are delivered.
#[derive(Debug, Clone, Copy)]
pub struct LineContext {
    pub group_id: i64,
    pub bot_id: i64,
    pub default_sender: i64,
}

impl LineContext {
    /// Split `"<sender>: <text>"`; lines without a numeric prefix come from the
    /// default sender.
    pub fn split_sender<'a>(&self, line: &'a str) -> (i64, &'a str) {
        if let Some((prefix, text)) = line.split_once(':') {
            if let Ok(sender) = prefix.trim().parse::<i64>() {
                return (sender, text.strip_prefix(' ').unwrap_or(text));
            }
        }
        (self.default_sender, line)
    }

    /// Turn a typed line into a group message.
    ///
    /// Mentions use the wire syntax `@<id> `; mentioning the bot id marks the
    /// message as directed at the assistant.
    pub fn to_message(&self, line: &str) -> IncomingMessage {
        let (sender, text) = self.split_sender(line);
        let segments = mention::parse_reply(text);
        let directed = segments
            .iter()
            .any(|s| matches!(s, Segment::Mention { user_id } if *user_id == self.bot_id));
        IncomingMessage::new(self.group_id, sender, self.bot_id, segments, directed)
    }
}
