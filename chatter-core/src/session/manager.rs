//! Session registry and per-group current-session map.

use super::{Session, SessionError};
use chatter_common::config::DEFAULT_PERSONA;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sessions shown per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 5;

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

/// One page of a group's sessions, in creation order.
#[derive(Debug, Clone)]
pub struct SessionPage<'a> {
    pub items: Vec<&'a Session>,
    /// 1-based page actually returned after clamping
    pub page: usize,
    /// Always at least 1
    pub page_count: usize,
    /// Sessions in the group
    pub total: usize,
}

/// Owns every session and tracks which one is current for each group.
///
/// Serializes to the persisted state: the session list plus the
/// group-to-current-session map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManager {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    current: HashMap<i64, String>,
    #[serde(skip, default = "default_persona")]
    default_persona: String,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA)
    }
}

impl SessionManager {
    /// Create an empty manager using `default_persona` for prompt-less sessions.
    pub fn new(default_persona: impl Into<String>) -> Self {
        Self {
            sessions: Vec::new(),
            current: HashMap::new(),
            default_persona: default_persona.into(),
        }
    }

    /// Replace the persona used for prompt-less sessions.
    pub fn set_default_persona(&mut self, persona: impl Into<String>) {
        self.default_persona = persona.into();
    }

    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }

    /// All sessions across groups, in creation order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Sessions belonging to `group_id`, in creation order.
    pub fn group_sessions(&self, group_id: i64) -> impl Iterator<Item = &Session> {
        self.sessions
            .iter()
            .filter(move |s| s.group_id() == group_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == session_id)
    }

    /// Find a session in `group_id` by id first, then by display name.
    ///
    /// Name matches resolve to the earliest created session.
    pub fn find(&self, group_id: i64, id_or_name: &str) -> Option<&Session> {
        self.group_sessions(group_id)
            .find(|s| s.matches_id(id_or_name))
            .or_else(|| {
                self.group_sessions(group_id)
                    .find(|s| s.matches_name(id_or_name))
            })
    }

    fn find_id(&self, group_id: i64, id_or_name: &str) -> Result<String, SessionError> {
        self.find(group_id, id_or_name)
            .map(|s| s.id().to_string())
            .ok_or_else(|| SessionError::NotFound(id_or_name.to_string()))
    }

    fn next_session_id(&self, group_id: i64, now: DateTime<Utc>) -> String {
        let mut secs = now.timestamp();
        loop {
            let id = format!("group-{group_id}-{secs}");
            if self.get(&id).is_none() {
                return id;
            }
            secs += 1;
        }
    }

    /// Create a session in `group_id` and make it current.
    ///
    /// An empty `prompt` selects the default persona.
    pub fn create_session(&mut self, group_id: i64, prompt: &str) -> &Session {
        let prompt = if prompt.trim().is_empty() {
            self.default_persona.clone()
        } else {
            prompt.to_string()
        };

        let now = Utc::now();
        let id = self.next_session_id(group_id, now);
        tracing::info!(group_id, session_id = %id, "Created session");

        self.current.insert(group_id, id.clone());
        self.sessions.push(Session::new(id, group_id, prompt, now));
        &self.sessions[self.sessions.len() - 1]
    }

    /// Id of the current session of `group_id`.
    pub fn current_id(&self, group_id: i64) -> Option<&str> {
        self.current.get(&group_id).map(String::as_str)
    }

    pub fn current_session(&self, group_id: i64) -> Option<&Session> {
        let id = self.current.get(&group_id)?;
        self.get(id)
    }

    pub fn current_session_mut(&mut self, group_id: i64) -> Option<&mut Session> {
        let id = self.current.get(&group_id)?.clone();
        self.get_mut(&id)
    }

    /// Current session of `group_id`, creating one with the default persona
    /// when the group has none.
    pub fn current_or_create(&mut self, group_id: i64) -> &mut Session {
        let existing = self.current_session(group_id).map(|s| s.id().to_string());
        let id = match existing {
            Some(id) => id,
            None => self.create_session(group_id, "").id().to_string(),
        };
        let idx = self
            .sessions
            .iter()
            .position(|s| s.id() == id)
            .unwrap_or(self.sessions.len() - 1);
        &mut self.sessions[idx]
    }

    /// Start a fresh session reusing the current persona.
    ///
    /// The old session stays in the group's history. Returns `None` and does
    /// nothing when the group has no current session.
    pub fn reset_session(&mut self, group_id: i64) -> Option<&Session> {
        let prompt = self.current_session(group_id)?.system_prompt().to_string();
        Some(self.create_session(group_id, &prompt))
    }

    /// Make the session identified by `id_or_name` current.
    pub fn switch_session(
        &mut self,
        group_id: i64,
        id_or_name: &str,
    ) -> Result<&Session, SessionError> {
        let id = self.find_id(group_id, id_or_name)?;
        tracing::info!(group_id, session_id = %id, "Switched session");
        self.current.insert(group_id, id.clone());
        self.get(&id)
            .ok_or(SessionError::NotFound(id_or_name.to_string()))
    }

    /// Rename a session of `group_id`.
    ///
    /// `target` selects the session by id or name; `None` renames the current
    /// session. Fails without changing anything when another session of the
    /// group already answers to `new_name`.
    pub fn rename_session(
        &mut self,
        group_id: i64,
        target: Option<&str>,
        new_name: &str,
    ) -> Result<&Session, SessionError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(SessionError::InvalidName(new_name.to_string()));
        }

        let id = match target {
            Some(target) => self.find_id(group_id, target)?,
            None => self
                .current_id(group_id)
                .map(str::to_string)
                .ok_or(SessionError::NoCurrentSession(group_id))?,
        };

        if let Some(existing) = self.find(group_id, new_name) {
            if existing.id() != id {
                return Err(SessionError::NameConflict {
                    name: new_name.to_string(),
                    existing_id: existing.id().to_string(),
                });
            }
        }

        let session = self
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        session.set_display_name(new_name);
        tracing::info!(group_id, session_id = %id, name = %new_name, "Renamed session");
        Ok(&*session)
    }

    /// Page through the group's sessions.
    ///
    /// `page` is 1-based and clamped into `[1, page_count]`; `page_size` of 0
    /// is treated as 1.
    pub fn list_sessions(&self, group_id: i64, page: usize, page_size: usize) -> SessionPage<'_> {
        let page_size = page_size.max(1);
        let all: Vec<&Session> = self.group_sessions(group_id).collect();
        let total = all.len();
        let page_count = total.div_ceil(page_size).max(1);
        let page = page.clamp(1, page_count);

        let items = all
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        SessionPage {
            items,
            page,
            page_count,
            total,
        }
    }

    /// Append a record to the session with `session_id`, returning the new
    /// history length.
    pub fn add_history(
        &mut self,
        session_id: &str,
        speaker_id: i64,
        text: impl Into<String>,
        directed_at_bot: bool,
    ) -> Result<usize, SessionError> {
        let session = self
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(session.add_history(speaker_id, text, directed_at_bot))
    }
}
