//! Generation collaborator: OpenAI-compatible chat completions.
//!
//! [`GenerationClient::stream`] yields text deltas as they arrive;
//! [`GenerationClient::complete`] returns the whole message at once.

mod client;
mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use specter_shared::Result;

pub use client::OpenAiCompatClient;

/// Ordered text fragments produced by a streaming generation.
///
/// Ends when generation completes; an `Err` item means the stream failed.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat-completions request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Anything that can generate text for a chat request.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start a streaming generation. Transport errors before the first
    /// fragment are returned here; later failures arrive as `Err` items.
    async fn stream(&self, request: ChatRequest) -> Result<TokenStream>;

    /// Run a non-streaming generation and return the full message text.
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}
