//! Provider abstractions for chat models, embeddings and extraction
//!
//! This module provides trait-based abstractions that allow switching between
//! a local Ollama server and OpenAI-compatible endpoints.

pub mod embedding;
pub mod http;
pub mod llm;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::config::{BackendProvider, RagConfig};
use crate::error::Result;
use crate::ingestion::{DocumentExtractor, LocalExtractor};

pub use embedding::EmbeddingProvider;
pub use llm::{ChatModel, TextStream};
pub use ollama::{OllamaChat, OllamaClient, OllamaEmbedder};
pub use openai::{OpenAiChat, OpenAiClient, OpenAiEmbedder};

/// The external capabilities the service runs against
#[derive(Clone)]
pub struct Providers {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub extractor: Arc<dyn DocumentExtractor>,
}

/// Build providers from configuration
pub fn build(config: &RagConfig) -> Result<Providers> {
    let chat: Arc<dyn ChatModel> = match config.llm.backend {
        BackendProvider::Ollama => Arc::new(OllamaChat::new(&config.llm)?),
        BackendProvider::OpenAi => Arc::new(OpenAiChat::new(&config.llm)?),
    };
    let embedder: Arc<dyn EmbeddingProvider> = match config.embeddings.backend {
        BackendProvider::Ollama => Arc::new(OllamaEmbedder::new(&config.embeddings)?),
        BackendProvider::OpenAi => Arc::new(OpenAiEmbedder::new(&config.embeddings)?),
    };

    tracing::info!(
        "Providers: chat {:?} ({}), embeddings {:?} ({})",
        config.llm.backend,
        config.llm.model,
        config.embeddings.backend,
        config.embeddings.model
    );

    Ok(Providers {
        chat,
        embedder,
        extractor: Arc::new(LocalExtractor::new()),
    })
}
