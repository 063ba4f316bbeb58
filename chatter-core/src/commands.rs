//! Session management commands.
//!
//! Commands arrive already parsed; this module runs them against a
//! [`SessionManager`] and produces the reply text for the group.

use crate::session::{SessionError, SessionManager, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Usage text for the session commands.
pub const USAGE: &str = "\
1. List the group's sessions
Command: \"cgpt session ls [-s <session id>] [-p <page>]\"
Lists the sessions of this group.
Optional: \"-s\" show one session in detail instead of the list; \"-p\" page to show, first page when omitted

2. Start a new session with a new persona
Command: \"cgpt session new [-n <name>] [persona]\"
Creates a session in this group and makes it current.
Optional: \"persona\" the persona prompt, the default persona when omitted; \"-n\" a name for the new session

3. Clear the current session but keep its persona
Command: \"cgpt session reset\"
Starts a fresh session with the current persona. The old session is kept.

4. Switch sessions
Command: \"cgpt session switch <session id or name>\"
Makes another session of this group current.

5. Rename a session
Command: \"cgpt session rename [-s <session id or name>] <new name>\"
Gives a session a name that can be used instead of its id.
Optional: \"-s\" the session to rename, the current session when omitted
";

/// An already-parsed session command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    /// List sessions, or show one in detail when `target` is set
    List {
        #[serde(default)]
        page: usize,
        #[serde(default)]
        target: Option<String>,
    },
    /// Create a session; empty `prompt` means the default persona
    New {
        #[serde(default)]
        prompt: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Start over with the current persona
    Reset,
    /// Make another session current
    Switch { target: String },
    /// Rename `target`, or the current session when absent
    Rename {
        #[serde(default)]
        target: Option<String>,
        new_name: String,
    },
    /// Ask the backend how to use the commands
    Help {
        #[serde(default)]
        question: String,
    },
}

/// Prompt sent to the backend for [`SessionCommand::Help`].
pub fn help_prompt(question: &str) -> String {
    format!(
        "Here is the usage guide of the cgpt command:{USAGE}\n\
Answer the user's question from the guide and give usage examples to help them use the command. \
The user's question is: {}",
        question.trim()
    )
}

/// Result of running a command locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: String,
    /// Whether session state changed and should be persisted
    pub changed: bool,
}

impl CommandOutcome {
    fn changed(reply: String) -> Self {
        Self {
            reply,
            changed: true,
        }
    }

    fn unchanged(reply: String) -> Self {
        Self {
            reply,
            changed: false,
        }
    }
}

/// Run `command` for `group_id` against `manager`.
///
/// [`SessionCommand::Help`] needs the backend; here it answers with the plain
/// usage text.
pub fn run(manager: &mut SessionManager, group_id: i64, command: &SessionCommand) -> CommandOutcome {
    match command {
        SessionCommand::List { page, target } => {
            CommandOutcome::unchanged(list(manager, group_id, *page, target.as_deref()))
        }
        SessionCommand::New { prompt, name } => new_session(manager, group_id, prompt, name.as_deref()),
        SessionCommand::Reset => {
            let Some(old_id) = manager.current_id(group_id).map(str::to_string) else {
                return CommandOutcome::unchanged(
                    "This group has no current session; start chatting to create one.".into(),
                );
            };
            manager.reset_session(group_id);
            CommandOutcome::changed(format!(
                "Reset the current session. The old session id is {old_id}; you can switch back any time."
            ))
        }
        SessionCommand::Switch { target } => match manager.switch_session(group_id, target) {
            Ok(session) => CommandOutcome::changed(format!("Switched to session {}", session.id())),
            Err(e) => CommandOutcome::unchanged(describe_error(&e)),
        },
        SessionCommand::Rename { target, new_name } => {
            match manager.rename_session(group_id, target.as_deref(), new_name) {
                Ok(session) => {
                    let reply = match target {
                        Some(target) => format!(
                            "Renamed session {target} to {}; the name can be used instead of the id.",
                            session.display_name()
                        ),
                        None => format!(
                            "Renamed the current session to {}; the name can be used instead of the id.",
                            session.display_name()
                        ),
                    };
                    CommandOutcome::changed(reply)
                }
                Err(e) => CommandOutcome::unchanged(describe_error(&e)),
            }
        }
        SessionCommand::Help { .. } => CommandOutcome::unchanged(USAGE.to_string()),
    }
}

fn list(manager: &SessionManager, group_id: i64, page: usize, target: Option<&str>) -> String {
    let listing = manager.list_sessions(group_id, page, DEFAULT_PAGE_SIZE);
    if listing.total == 0 {
        return "This group has no sessions yet; start chatting to create the default one.".into();
    }

    if let Some(target) = target {
        return match manager.find(group_id, target) {
            Some(session) => session.detail(),
            None => describe_error(&SessionError::NotFound(target.to_string())),
        };
    }

    let briefs: Vec<String> = listing.items.iter().map(|s| s.brief()).collect();
    format!(
        "This group has {} sessions, page {}/{}:\n{}",
        listing.total,
        listing.page,
        listing.page_count,
        briefs.join("\n\n")
    )
}

fn new_session(
    manager: &mut SessionManager,
    group_id: i64,
    prompt: &str,
    name: Option<&str>,
) -> CommandOutcome {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    if let Some(name) = name {
        if let Some(existing) = manager.find(group_id, name) {
            return CommandOutcome::unchanged(describe_error(&SessionError::NameConflict {
                name: name.to_string(),
                existing_id: existing.id().to_string(),
            }));
        }
    }

    let id = manager.create_session(group_id, prompt).id().to_string();
    match name {
        Some(name) => {
            if let Err(e) = manager.rename_session(group_id, Some(&id), name) {
                tracing::warn!(session_id = %id, error = %e, "Failed to name new session");
            }
            CommandOutcome::changed(format!("Created session {id}, named {name}"))
        }
        None => CommandOutcome::changed(format!(
            "Created session {id}; rename it with \"cgpt session rename <new name>\""
        )),
    }
}

fn describe_error(error: &SessionError) -> String {
    match error {
        SessionError::NotFound(target) => format!("Session {target} does not exist"),
        SessionError::NoCurrentSession(_) => {
            "This group has no current session; start chatting to create one.".into()
        }
        SessionError::NameConflict { existing_id, .. } => {
            format!("That name is already used by session {existing_id}")
        }
        SessionError::InvalidName(_) => "The new name must not be empty".into(),
    }
}
