//! Chatter Core - Conversational-context engine for a group-chat assistant.
//!
//! This crate provides:
//! - Mention codec between structured segments and `@<id> ` wire text
//! - Sessions: per-group timelines with personas, persisted as JSON
//! - Context building under a character budget
//! - Engagement gate and per-group debouncing
//! - Reply orchestration over a backend provider and a chat transport
//!
//! ## Architecture
//!
//! ```text
//! transport → record → gate → debounce → context → provider
//!                ↓                                     ↓
//!             sessions ←──────── record reply ←── transport
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod commands;
pub mod context;
pub mod debounce;
pub mod gate;
pub mod mention;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use commands::{CommandOutcome, SessionCommand};
pub use context::{ContextBuilder, ContextWindow, Role, Turn};
pub use debounce::Debouncer;
pub use gate::EngagementGate;
pub use mention::Segment;
pub use orchestrator::{MessageOutcome, OrchestratorSettings, ReplyOrchestrator};
pub use provider::{ChatProvider, OpenAiProvider, ProviderError};
pub use session::{
    BlobStore, FileBlobStore, HistoryRecord, MemoryBlobStore, Session, SessionError,
    SessionManager, SessionStore, StoreError,
};
pub use transport::{ChatTransport, IncomingMessage, OutgoingReply, TransportError, TransportResult};
