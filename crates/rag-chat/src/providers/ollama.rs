//! Ollama client for generation and embeddings with retry logic

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::embedding::EmbeddingProvider;
use super::http::{build_client, ensure_success, lines, retry_request};
use super::llm::{ChatModel, TextStream};
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

/// Ollama API client with automatic retry
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Server root, e.g. `http://localhost:11434`
    base_url: String,
    /// Maximum retries
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    pub fn new(base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding with retry
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbedRequest { model, prompt: text };
        let (client, url, request) = (&self.client, &url, &request);

        retry_request(self.max_retries, || async move {
            let response = client
                .post(url)
                .json(request)
                .send()
                .await
                .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;
            let response = ensure_success(response, Error::Embedding, "Embedding").await?;

            let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                Error::embedding(format!("Failed to parse embedding response: {}", e))
            })?;
            if embed_response.embedding.is_empty() {
                return Err(Error::embedding("Empty embedding returned"));
            }
            Ok(embed_response.embedding)
        })
        .await
    }

    /// Generate a whole response with retry
    pub async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
        };
        let (client, url, request) = (&self.client, &url, &request);

        tracing::debug!("Generating with model: {}", model);

        retry_request(self.max_retries, || async move {
            let response = client
                .post(url)
                .json(request)
                .send()
                .await
                .map_err(|e| Error::llm(format!("Generation request failed: {}", e)))?;
            let response = ensure_success(response, Error::Llm, "Generation").await?;

            let generate_response: GenerateResponse = response
                .json()
                .await
                .map_err(|e| Error::llm(format!("Failed to parse generation response: {}", e)))?;
            Ok(generate_response.response)
        })
        .await
    }

    /// Generate a streaming response from Ollama's NDJSON output
    ///
    /// Only opening the stream is retried; a failure after the first
    /// fragment ends the stream with an error.
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<TextStream> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
            options: GenerateOptions { temperature },
        };
        let (client, url, request) = (&self.client, &url, &request);

        let response = retry_request(self.max_retries, || async move {
            let response = client
                .post(url)
                .json(request)
                .send()
                .await
                .map_err(|e| Error::llm(format!("Stream request failed: {}", e)))?;
            ensure_success(response, Error::Llm, "Stream").await
        })
        .await?;

        let fragments = lines(response.bytes_stream()).filter_map(|line| async move {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(Error::llm(format!("Stream error: {}", e)))),
            };
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<StreamChunk>(&line) {
                Ok(StreamChunk { error: Some(e), .. }) => Some(Err(Error::llm(e))),
                Ok(chunk) if chunk.response.is_empty() => None,
                Ok(chunk) => Some(Ok(chunk.response)),
                Err(e) => Some(Err(Error::llm(format!("Malformed stream line: {}", e)))),
            }
        });

        Ok(fragments.boxed())
    }
}

/// Ollama chat model
pub struct OllamaChat {
    client: Arc<OllamaClient>,
    model: String,
    temperature: f32,
}

impl OllamaChat {
    /// Create a new Ollama chat model
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.base_url, config.timeout_secs, config.max_retries)?;
        Ok(Self::from_client(Arc::new(client), config))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.client.generate(&self.model, prompt, self.temperature).await
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        self.client
            .generate_stream(&self.model, prompt, self.temperature)
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }
}

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.base_url, config.timeout_secs, config.max_retries)?;
        Ok(Self::from_client(Arc::new(client), config.model.clone()))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(&self.model, text).await
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }
}
