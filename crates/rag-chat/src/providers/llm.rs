//! Chat model capability

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A finite, lazily produced sequence of answer fragments
pub type TextStream = BoxStream<'static, Result<String>>;

/// Trait for prompt-in, text-out chat models
///
/// Implementations:
/// - `OllamaChat`: local Ollama server (`/api/generate`)
/// - `OpenAiChat`: any OpenAI-compatible `/chat/completions` endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the whole response for `prompt`
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Generate the response for `prompt` as a stream of fragments
    async fn stream(&self, prompt: &str) -> Result<TextStream>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;
}
