//! Conversation sessions.
//!
//! A group owns any number of sessions, at most one of which is current. The
//! [`SessionManager`] is the single authority over creation, lookup, renaming
//! and switching; [`SessionStore`] persists it through a [`BlobStore`].

mod manager;
mod store;
mod types;

pub use manager::{SessionManager, SessionPage, DEFAULT_PAGE_SIZE};
pub use store::{
    BlobStore, FileBlobStore, MemoryBlobStore, SessionStore, Snapshot, StoreError, SESSIONS_NAME,
    SESSIONS_NAMESPACE,
};
pub use types::{HistoryRecord, Session, ASSISTANT_SPEAKER_ID};

/// Errors returned by session management operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no session with id or name '{0}' in this group")]
    NotFound(String),

    #[error("group {0} has no current session")]
    NoCurrentSession(i64),

    #[error("name '{name}' is already used by session {existing_id}")]
    NameConflict { name: String, existing_id: String },

    #[error("invalid session name: '{0}'")]
    InvalidName(String),
}
