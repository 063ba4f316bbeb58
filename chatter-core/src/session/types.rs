//! Session and history record types.

use chatter_common::util::{flatten_lines, take_chars};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Speaker id used for records authored by the assistant itself.
///
/// Real participants always carry a positive id on the transports we serve.
pub const ASSISTANT_SPEAKER_ID: i64 = 0;

/// Number of records shown by [`Session::brief`].
const BRIEF_PREVIEW_RECORDS: usize = 4;
/// Number of records shown by [`Session::detail`].
const DETAIL_PREVIEW_RECORDS: usize = 10;
/// Characters of each record shown in previews.
const PREVIEW_TEXT_CHARS: usize = 10;
/// Characters of the persona shown in briefs.
const BRIEF_PROMPT_CHARS: usize = 20;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line of conversation. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Author of the message
    pub speaker_id: i64,
    /// When the message was recorded
    pub timestamp: DateTime<Utc>,
    /// Flattened message text, mentions in `@<id> ` form
    pub text: String,
    /// Whether the author addressed the assistant directly
    pub directed_at_bot: bool,
}

impl HistoryRecord {
    /// Create a record stamped with the current time.
    pub fn new(speaker_id: i64, text: impl Into<String>, directed_at_bot: bool) -> Self {
        Self {
            speaker_id,
            timestamp: Utc::now(),
            text: text.into(),
            directed_at_bot,
        }
    }

    /// Whether the assistant wrote this record.
    pub const fn is_from_assistant(&self) -> bool {
        self.speaker_id == ASSISTANT_SPEAKER_ID
    }
}

/// A named timeline of one group's conversation sharing a single persona.
///
/// The id, group and persona are fixed at creation and history is append-only;
/// the only mutable attribute is the display name, which is changed through
/// [`SessionManager`](super::SessionManager) so name uniqueness can be enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    #[serde(default)]
    display_name: String,
    system_prompt: String,
    group_id: i64,
    created_at: DateTime<Utc>,
    #[serde(default)]
    history: Vec<HistoryRecord>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        group_id: i64,
        system_prompt: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            display_name: String::new(),
            system_prompt,
            group_id,
            created_at,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name, empty when unnamed.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub const fn group_id(&self) -> i64 {
        self.group_id
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Append a record, returning the new history length.
    pub fn add_history(
        &mut self,
        speaker_id: i64,
        text: impl Into<String>,
        directed_at_bot: bool,
    ) -> usize {
        self.history
            .push(HistoryRecord::new(speaker_id, text, directed_at_bot));
        self.history.len()
    }

    /// Whether `id_or_name` refers to this session by id.
    pub fn matches_id(&self, id_or_name: &str) -> bool {
        self.id == id_or_name
    }

    /// Whether `id_or_name` refers to this session by display name.
    pub fn matches_name(&self, id_or_name: &str) -> bool {
        !self.display_name.is_empty() && self.display_name == id_or_name
    }

    pub(crate) fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    fn shown_name(&self) -> &str {
        if self.display_name.is_empty() {
            "unnamed"
        } else {
            &self.display_name
        }
    }

    fn shown_time(&self) -> String {
        self.created_at
            .with_timezone(&Local)
            .format(TIME_FORMAT)
            .to_string()
    }

    /// Preview of the first `count` records, one `"<speaker>: <text>"` line each.
    pub fn dialog_preview(&self, count: usize) -> String {
        let mut dialog = String::new();
        for record in self.history.iter().take(count) {
            let flat = flatten_lines(&record.text);
            let _ = writeln!(
                dialog,
                "{}: {}",
                record.speaker_id,
                take_chars(&flat, PREVIEW_TEXT_CHARS)
            );
        }
        dialog
    }

    /// Short multi-line summary used in session listings.
    pub fn brief(&self) -> String {
        format!(
            "[Session ID]: {}\n[Name]: {}\n[Created]: {}\n[Persona]: {}\n[Preview ({} records)]:\n{}",
            self.id,
            self.shown_name(),
            self.shown_time(),
            take_chars(&self.system_prompt, BRIEF_PROMPT_CHARS),
            self.history.len(),
            self.dialog_preview(BRIEF_PREVIEW_RECORDS),
        )
    }

    /// Full description of a single session.
    pub fn detail(&self) -> String {
        format!(
            "[Session ID]: {}\n[Session name]: {}\n[Created at]: {}\n[Persona]: {}\n[History ({} records)]:\n{}",
            self.id,
            self.shown_name(),
            self.shown_time(),
            self.system_prompt,
            self.history.len(),
            self.dialog_preview(DETAIL_PREVIEW_RECORDS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "group-7-1700000000".into(),
            7,
            "Speak like a pirate at all times, matey".into(),
            Utc::now(),
        )
    }

    #[test]
    fn add_history_is_append_only() {
        let mut s = session();
        assert_eq!(s.add_history(1, "first", false), 1);
        assert_eq!(s.add_history(2, "second", true), 2);
        assert_eq!(s.add_history(ASSISTANT_SPEAKER_ID, "third", false), 3);

        let texts: Vec<_> = s.history().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(s.history()[1].directed_at_bot);
        assert!(s.history()[2].is_from_assistant());
        assert!(!s.history()[0].is_from_assistant());
    }

    #[test]
    fn empty_name_never_matches() {
        let s = session();
        assert!(!s.matches_name(""));
        assert!(s.matches_id("group-7-1700000000"));
    }

    #[test]
    fn dialog_preview_flattens_and_cuts() {
        let mut s = session();
        s.add_history(11, "line one\nline two is long", false);
        s.add_history(12, "short", false);
        s.add_history(13, "not shown", false);

        let preview = s.dialog_preview(2);
        assert_eq!(preview, "11: line one l\n12: short\n");
    }

    #[test]
    fn brief_and_detail() {
        let mut s = session();
        s.add_history(11, "hello", false);

        let brief = s.brief();
        assert!(brief.contains("[Session ID]: group-7-1700000000"));
        assert!(brief.contains("[Name]: unnamed"));
        assert!(brief.contains("[Persona]: Speak like a pirate \n"));
        assert!(brief.contains("(1 records)"));
        assert!(brief.contains("11: hello"));

        s.set_display_name("pirates");
        let detail = s.detail();
        assert!(detail.contains("[Session name]: pirates"));
        assert!(detail.contains("Speak like a pirate at all times, matey"));
    }

    #[test]
    fn serde_roundtrip_keeps_history() {
        let mut s = session();
        s.add_history(5, "persist me", true);

        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
