//! The external completion API, treated as a capability.
//!
//! The relay and the poll worker only depend on [`CompletionClient`]:
//! submit a prompt and get either the full text, or a cancellable stream of
//! text deltas that ends with end-of-stream, a finish reason, or an error.
//! Dropping a [`DeltaStream`] aborts the underlying request.

pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use crate::errors::CompletionError;
pub use openai::OpenAiClient;
pub use scripted::{ScriptedClient, Step};

/// One increment of streamed output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    pub content: String,
    /// Set on the increment that ends the completion (`"stop"`, `"length"`, ...).
    pub finish_reason: Option<String>,
}

impl Delta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
        }
    }

    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            finish_reason: Some(reason.into()),
        }
    }
}

pub type DeltaStream = BoxStream<'static, Result<Delta, CompletionError>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Non-streaming completion: the whole answer at once.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Streaming completion.
    async fn stream(&self, prompt: &str) -> Result<DeltaStream, CompletionError>;
}
