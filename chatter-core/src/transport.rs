//! Chat transport seam.
//!
//! Inbound messages arrive as [`IncomingMessage`]s; replies leave through a
//! [`ChatTransport`]. The pipeline never talks to a chat platform directly.

use crate::mention::{self, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport error type.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Transport not ready")]
    NotReady,
}

/// A group message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub group_id: i64,
    pub sender_id: i64,
    /// The assistant's own participant id on this transport
    pub self_id: i64,
    pub segments: Vec<Segment>,
    /// Whether the assistant was addressed (mentioned or replied to)
    pub directed_at_bot: bool,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(
        group_id: i64,
        sender_id: i64,
        self_id: i64,
        segments: Vec<Segment>,
        directed_at_bot: bool,
    ) -> Self {
        Self {
            group_id,
            sender_id,
            self_id,
            segments,
            directed_at_bot,
            timestamp: Utc::now(),
        }
    }

    /// Backend text for this message, with mentions of the assistant removed.
    pub fn text(&self) -> String {
        mention::flatten(&self.segments, Some(self.self_id))
    }
}

/// A reply to post into a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingReply {
    pub group_id: i64,
    /// Participant to address the reply to, if any
    pub at_sender: Option<i64>,
    pub segments: Vec<Segment>,
}

impl OutgoingReply {
    /// Plain text reply with no addressee.
    pub fn text(group_id: i64, text: impl Into<String>) -> Self {
        Self {
            group_id,
            at_sender: None,
            segments: vec![Segment::text(text)],
        }
    }

    /// Wire text of the reply, addressee included.
    pub fn render(&self) -> String {
        let body = mention::render(&self.segments);
        match self.at_sender {
            Some(user_id) => format!("{}{body}", mention::encode_mention(user_id)),
            None => body,
        }
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &str;

    /// Post a reply into its group.
    async fn send(&self, reply: OutgoingReply) -> TransportResult<()>;
}
