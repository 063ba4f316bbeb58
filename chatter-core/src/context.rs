//! Context building.
//!
//! Turns a session's flat history into the alternating user/assistant turn
//! list the backend consumes. Consecutive participant records are grouped into
//! one user turn; each assistant record is its own turn. Old turns are dropped
//! to keep the request inside a character budget, and the first surviving turn
//! is wrapped in an instruction template carrying the session persona.

use crate::session::{HistoryRecord, Session};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Default character budget for the selected turns.
pub const DEFAULT_CHAR_BUDGET: usize = 2000;

/// Prefixed to the first kept turn when older turns were dropped.
pub const OMISSION_MARKER: &str = "(earlier history omitted)\n";

/// Appended to records that addressed the assistant directly.
pub const DIRECTED_SUFFIX: &str = " (directed at you)";

/// Role of a turn in the backend conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Length used against the character budget.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Format one participant record as a transcript line.
pub fn format_record(record: &HistoryRecord) -> String {
    let suffix = if record.directed_at_bot {
        DIRECTED_SUFFIX
    } else {
        ""
    };
    format!(
        "{}: \"\"\"{}\"\"\"{}\n",
        record.speaker_id, record.text, suffix
    )
}

/// Group history into strictly alternating turns starting with a user turn.
///
/// Runs of participant records collapse into one user turn. If an assistant
/// record is not preceded by participant records, an empty user turn keeps the
/// alternation intact.
pub fn group_turns(history: &[HistoryRecord]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut idx = 0;

    while idx < history.len() {
        let mut transcript = String::new();
        while idx < history.len() && !history[idx].is_from_assistant() {
            transcript.push_str(&format_record(&history[idx]));
            idx += 1;
        }
        turns.push(Turn::user(transcript));

        if idx < history.len() {
            turns.push(Turn::assistant(history[idx].text.clone()));
            idx += 1;
        }
    }

    turns
}

/// Index of the first turn to keep under `budget`.
///
/// Picks the longest suffix that starts with a user turn and whose total
/// length fits the budget. When even the suffix starting at the last user turn
/// is too long, that suffix is kept whole.
pub fn select_start(turns: &[Turn], budget: usize) -> usize {
    let mut total = 0;
    let mut start = turns.len();
    for (idx, turn) in turns.iter().enumerate().rev() {
        let len = turn.char_len();
        if total + len > budget {
            break;
        }
        total += len;
        start = idx;
    }

    while start < turns.len() && turns[start].role != Role::User {
        start += 1;
    }

    if start == turns.len() {
        // Nothing user-led fits; keep the last user turn untruncated.
        return turns
            .iter()
            .rposition(|t| t.role == Role::User)
            .unwrap_or(0);
    }

    start
}

/// Turns selected under the budget, before decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub turns: Vec<Turn>,
    /// Number of leading turns dropped
    pub omitted: usize,
}

impl ContextWindow {
    /// Sum of the kept turns' lengths.
    pub fn char_len(&self) -> usize {
        self.turns.iter().map(Turn::char_len).sum()
    }
}

/// Wrap the first turn's transcript in the instruction template.
pub fn render_prompt(persona: &str, transcript: &str) -> String {
    let mut prompt = String::from(
        "You are a member of a group chat. Below is the group's chat history, \
one message per line in the format: ID: \"\"\"message\"\"\". Different members have different IDs. \
For example, a chat between two people:\n\
333444555: \"\"\"Lovely weather today!\"\"\"\n\
666874455: \"\"\"Any plans?\"\"\"\n\n\
A message may span several lines. When someone talks to you directly, the line is marked. For example:\n\
666874455: \"\"\"Any plans?\"\"\" (directed at you)\n\
This means 666874455 is asking you \"Any plans?\". Answer them promptly so your reply stays on topic.\n\n\
Members refer to each other with the \"@ID \" form, for example:\n\
333444555: \"\"\"Lovely weather today! @666874455 what do you think\"\"\"\n\
666874455: \"\"\"Not bad.\"\"\"\n\
Use the IDs to work out who is talking to whom. \
When you mention someone, write \"@ID \" and do not forget the space after the ID. \
To mention 666874455 you would write \"@666874455 \". \
If someone tells you the nickname behind an ID, you may use the nickname instead.\n\n\
Older parts of the history are sometimes left out because of length limits. The conversation then starts with a note, for example:\n\
(earlier history omitted)\n\
666874455: \"\"\"haha\"\"\"\n\
Treat the omitted part as forgotten. You may try to infer it or tell the members you have forgotten it.\n\n\
Follow the topic and reply with one message that joins the conversation. \
Small-talk replies are usually one or two sentences with no formatting. Requirements for your reply:\n",
    );
    let _ = write!(
        prompt,
        "{persona}\n\n\
Here is the chat history. Forget the example scenes above and reply:\n\
{transcript}\n\
Output only the message itself, without an ID or quotes.\n\
Wrong: 0: \"\"\"I'm off to the movies.\"\"\"\n\
Right: I'm off to the movies.\n"
    );
    prompt
}

/// Builds backend turns for a session under a character budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    char_budget: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_BUDGET)
    }
}

impl ContextBuilder {
    pub const fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    pub const fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Group and bound the history without adding the marker or template.
    pub fn window(&self, history: &[HistoryRecord]) -> ContextWindow {
        let mut turns = group_turns(history);
        let omitted = select_start(&turns, self.char_budget);
        turns.drain(..omitted);
        ContextWindow { turns, omitted }
    }

    /// Produce the final turn list for the backend.
    ///
    /// Empty history yields an empty list; callers skip the backend call then.
    pub fn build(&self, session: &Session) -> Vec<Turn> {
        let ContextWindow { mut turns, omitted } = self.window(session.history());

        if let Some(first) = turns.first_mut() {
            let transcript = if omitted > 0 {
                format!("{OMISSION_MARKER}{}", first.content)
            } else {
                std::mem::take(&mut first.content)
            };
            first.content = render_prompt(session.system_prompt(), &transcript);
        }

        turns
    }
}
