//! Mention codec.
//!
//! The backend only sees and produces plain text. Participants are referenced
//! with the wire syntax `@<decimal-id> ` (id followed by exactly one space).
//! This module converts between that syntax and structured [`Segment`]s in both
//! directions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Pattern for the part of a reply that follows an `@`: digits, one space, rest.
static MENTION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([0-9]+) (.*)$").unwrap());

/// One piece of a chat message as the transport understands it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Segment {
    /// Plain text
    Text { text: String },
    /// Reference to a participant
    Mention { user_id: i64 },
}

impl Segment {
    /// Plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Mention segment.
    pub const fn mention(user_id: i64) -> Self {
        Self::Mention { user_id }
    }
}

/// Render a mention in wire syntax.
pub fn encode_mention(user_id: i64) -> String {
    format!("@{user_id} ")
}

/// Flatten transport segments into backend text.
///
/// Text is kept verbatim and mentions become `@<id> `. Mentions of `self_id`
/// (the bot itself) are dropped, since being addressed is tracked separately.
pub fn flatten(segments: &[Segment], self_id: Option<i64>) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text { text } => out.push_str(text),
            Segment::Mention { user_id } if Some(*user_id) == self_id => {}
            Segment::Mention { user_id } => out.push_str(&encode_mention(*user_id)),
        }
    }
    out
}

/// Render segments back into wire text, mentions included.
pub fn render(segments: &[Segment]) -> String {
    flatten(segments, None)
}

/// Parse backend free text into structured segments.
///
/// The text is split on `@`. The first piece is plain text. Every later piece
/// that starts with digits followed by a space becomes a mention plus the
/// remaining text; any other piece is literal text with its `@` restored.
/// Adjacent text is merged and empty text is never emitted.
pub fn parse_reply(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pieces = raw.split('@');

    if let Some(first) = pieces.next() {
        push_text(&mut segments, first);
    }

    for piece in pieces {
        match parse_mention_piece(piece) {
            Some((user_id, rest)) => {
                segments.push(Segment::mention(user_id));
                push_text(&mut segments, rest);
            }
            None => {
                push_text(&mut segments, "@");
                push_text(&mut segments, piece);
            }
        }
    }

    segments
}

fn parse_mention_piece(piece: &str) -> Option<(i64, &str)> {
    let caps = MENTION_SEGMENT.captures(piece)?;
    // Ids too large for i64 cannot be real participants.
    let user_id = caps.get(1)?.as_str().parse::<i64>().ok()?;
    let rest = caps.get(2).map_or("", |m| m.as_str());
    Some((user_id, rest))
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text { text: last }) = segments.last_mut() {
        last.push_str(text);
        return;
    }
    segments.push(Segment::text(text));
}
