//! Parsing of `cgpt` command lines typed into the terminal.

use chatter_core::SessionCommand;
use clap::{ColorChoice, Parser, Subcommand};

const PREFIX: &str = "cgpt";

/// Session commands typed into the chat.
#[derive(Parser, Debug)]
#[command(name = PREFIX)]
#[command(disable_help_subcommand = true, disable_version_flag = true)]
#[command(color = ColorChoice::Never)]
struct Cgpt {
    #[command(subcommand)]
    command: CgptCommand,
}

#[derive(Subcommand, Debug)]
enum CgptCommand {
    /// Manage this group's sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Ask the assistant how to use these commands
    Help {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        question: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List sessions, or show one session in detail
    Ls {
        /// Page to show
        #[arg(short = 'p', default_value_t = 1)]
        page: usize,

        /// Session id or name to show in detail
        #[arg(short = 's')]
        session: Option<String>,
    },

    /// Start a new session, optionally with its own persona
    New {
        /// Name for the new session
        #[arg(short = 'n')]
        name: Option<String>,

        /// Persona; the rest of the line, line breaks included
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        persona: Vec<String>,
    },

    /// Start over with the current persona
    Reset,

    /// Make another session current
    Switch {
        /// Session id or name
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        session: Vec<String>,
    },

    /// Rename a session (the current one unless -s is given)
    Rename {
        /// Session id or name to rename
        #[arg(short = 's')]
        session: Option<String>,

        /// New name
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        new_name: Vec<String>,
    },
}

/// Parse `line` as a `cgpt` command.
///
/// Returns `None` when the line is ordinary chat, and `Some(Err(..))` with
/// clap's rendered message (usage errors and `--help` output) otherwise.
pub fn parse(line: &str) -> Option<Result<SessionCommand, String>> {
    let words = words(line);
    if words.first().map(|(_, w)| *w) != Some(PREFIX) {
        return None;
    }

    let cgpt = match Cgpt::try_parse_from(words.iter().map(|(_, w)| *w)) {
        Ok(cgpt) => cgpt,
        Err(e) => return Some(Err(e.to_string().trim_end().to_string())),
    };
    // Free-text arguments are always the tail of the line, so take them from
    // the raw text instead of re-joining the words.
    let tail = |taken: &[String]| raw_tail(line, &words, taken.len());

    let command = match cgpt.command {
        CgptCommand::Help { question } => SessionCommand::Help {
            question: tail(&question),
        },
        CgptCommand::Session { action } => match action {
            SessionAction::Ls { page, session } => SessionCommand::List {
                page,
                target: session,
            },
            SessionAction::New { name, persona } => SessionCommand::New {
                prompt: tail(&persona),
                name,
            },
            SessionAction::Reset => SessionCommand::Reset,
            SessionAction::Switch { session } => SessionCommand::Switch {
                target: tail(&session),
            },
            SessionAction::Rename { session, new_name } => SessionCommand::Rename {
                target: session,
                new_name: tail(&new_name),
            },
        },
    };
    Some(Ok(command))
}

/// Whitespace-separated words of `line` with their byte offsets.
fn words(line: &str) -> Vec<(usize, &str)> {
    let mut words = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(from)) => {
                words.push((from, &line[from..idx]));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(from) = start {
        words.push((from, &line[from..]));
    }
    words
}

/// The text of `line` from its `count`-th last word on.
fn raw_tail(line: &str, words: &[(usize, &str)], count: usize) -> String {
    if count == 0 || count > words.len() {
        return String::new();
    }
    line[words[words.len() - count].0..].trim_end().to_string()
}
