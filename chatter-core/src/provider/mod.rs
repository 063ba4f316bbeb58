//! Text-generation backend abstraction.
//!
//! The pipeline only needs "turns in, one text reply out"; [`ChatProvider`]
//! is that seam, with [`OpenAiProvider`] as the HTTP implementation.

mod openai;

pub use openai::OpenAiProvider;

use crate::context::Turn;
use async_trait::async_trait;

/// Backend that completes a conversation.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Produce the next assistant message for `turns`.
    async fn chat(&self, turns: &[Turn]) -> Result<String, ProviderError>;

    /// One-shot question without session context.
    async fn ask(&self, question: &str) -> Result<String, ProviderError> {
        self.chat(&[Turn::user(question)]).await
    }
}

/// Errors from a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request never got a response (connect, TLS, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with an error status.
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("backend returned no choices")]
    EmptyResponse,
}

impl ProviderError {
    /// Whether the backend itself rejected the request.
    pub const fn is_api(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// Notice shown to the group when a reply attempt fails.
    pub fn user_notice(&self) -> String {
        if self.is_api() {
            format!("The backend returned an error: {self}")
        } else {
            format!("Failed to reach the backend: {self}")
        }
    }
}
