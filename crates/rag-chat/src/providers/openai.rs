//! OpenAI-compatible client (chat completions and embeddings)
//!
//! Works against any server exposing the `/chat/completions` and
//! `/embeddings` routes, including self-hosted gateways.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::embedding::EmbeddingProvider;
use super::http::{build_client, ensure_success, lines, retry_request};
use super::llm::{ChatModel, TextStream};
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

/// OpenAI-compatible API client with automatic retry
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    /// Create a new client; `base_url` includes the API version prefix
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Check if the server lists its models
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Single-message chat completion
    pub async fn complete(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            temperature,
            stream: false,
        };
        let (url, request) = (&url, &request);

        retry_request(self.max_retries, || async move {
            let response = self
                .authorized(self.client.post(url))
                .json(request)
                .send()
                .await
                .map_err(|e| Error::llm(format!("Completion request failed: {}", e)))?;
            let response = ensure_success(response, Error::Llm, "Completion").await?;

            let completion: CompletionResponse = response
                .json()
                .await
                .map_err(|e| Error::llm(format!("Failed to parse completion: {}", e)))?;
            completion
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content.unwrap_or_default())
                .ok_or_else(|| Error::llm("Completion returned no choices"))
        })
        .await
    }

    /// Streaming chat completion over server-sent events
    pub async fn complete_stream(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<TextStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            temperature,
            stream: true,
        };
        let (url, request) = (&url, &request);

        let response = retry_request(self.max_retries, || async move {
            let response = self
                .authorized(self.client.post(url))
                .json(request)
                .send()
                .await
                .map_err(|e| Error::llm(format!("Stream request failed: {}", e)))?;
            ensure_success(response, Error::Llm, "Stream").await
        })
        .await?;

        let fragments = lines(response.bytes_stream())
            .take_while(|line| {
                let done = matches!(line, Ok(l) if l.trim() == "data: [DONE]");
                async move { !done }
            })
            .filter_map(|line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(Error::llm(format!("Stream error: {}", e)))),
                };
                let payload = line.strip_prefix("data:")?.trim();
                match serde_json::from_str::<StreamEvent>(payload) {
                    Ok(event) => event
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(Error::llm(format!("Malformed stream event: {}", e)))),
                }
            });

        Ok(fragments.boxed())
    }

    /// Embed a batch of texts in one request, returned in input order
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest { model, input: texts };
        let (url, request) = (&url, &request);

        retry_request(self.max_retries, || async move {
            let response = self
                .authorized(self.client.post(url))
                .json(request)
                .send()
                .await
                .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;
            let response = ensure_success(response, Error::Embedding, "Embedding").await?;

            let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                Error::embedding(format!("Failed to parse embedding response: {}", e))
            })?;
            if parsed.data.len() != texts.len() {
                return Err(Error::embedding(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                )));
            }
            parsed.data.sort_by_key(|d| d.index);
            Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
        })
        .await
    }
}

/// OpenAI-compatible chat model
pub struct OpenAiChat {
    client: Arc<OpenAiClient>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    /// Create a new chat model from the LLM configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = OpenAiClient::new(
            &config.base_url,
            config.api_key.clone(),
            config.timeout_secs,
            config.max_retries,
        )?;
        Ok(Self {
            client: Arc::new(client),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.client.complete(&self.model, prompt, self.temperature).await
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        self.client
            .complete_stream(&self.model, prompt, self.temperature)
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }
}

/// OpenAI-compatible embedding provider with native batching
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiEmbedder {
    /// Create a new embedder from the embeddings configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = OpenAiClient::new(
            &config.base_url,
            config.api_key.clone(),
            config.timeout_secs,
            config.max_retries,
        )?;
        Ok(Self {
            client: Arc::new(client),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client
            .embed(&self.model, &[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.embed(&self.model, texts).await
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendProvider;
    use crate::providers::test_support::spawn_fake;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn fake_openai() -> Router {
        Router::new()
            .route(
                "/v1/models",
                get(|headers: HeaderMap| async move {
                    let authorized = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer sk-test");
                    if authorized {
                        StatusCode::OK
                    } else {
                        StatusCode::UNAUTHORIZED
                    }
                }),
            )
            .route(
                "/v1/chat/completions",
                post(|Json(body): Json<Value>| async move {
                    let prompt = body["messages"][0]["content"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    if body["stream"] == json!(true) {
                        let mut sse = String::new();
                        for piece in ["re: ", prompt.as_str()] {
                            let event = json!({"choices": [{"delta": {"content": piece}}]});
                            sse.push_str(&format!("data: {}\n\n", event));
                        }
                        sse.push_str("data: [DONE]\n\n");
                        ([(header::CONTENT_TYPE, "text/event-stream")], sse)
                    } else {
                        let reply = json!({"choices": [{"message": {"role": "assistant", "content": format!("re: {}", prompt)}}]});
                        ([(header::CONTENT_TYPE, "application/json")], reply.to_string())
                    }
                }),
            )
            .route(
                "/v1/embeddings",
                post(|Json(body): Json<Value>| async move {
                    let inputs = body["input"].as_array().cloned().unwrap_or_default();
                    // reversed on purpose: clients must order by index
                    let data: Vec<Value> = inputs
                        .iter()
                        .enumerate()
                        .rev()
                        .map(|(i, text)| {
                            let len = text.as_str().unwrap_or_default().len() as f32;
                            json!({"index": i, "embedding": [len, 0.5]})
                        })
                        .collect();
                    Json(json!({"data": data}))
                }),
            )
    }

    fn llm_config(base: &str) -> LlmConfig {
        LlmConfig {
            backend: BackendProvider::OpenAi,
            base_url: format!("{}/v1", base),
            api_key: Some("sk-test".to_string()),
            max_retries: 0,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_complete_and_health() {
        let base = spawn_fake(fake_openai()).await;
        let chat = OpenAiChat::new(&llm_config(&base)).unwrap();

        assert!(chat.health_check().await.unwrap());
        assert_eq!(chat.invoke("question").await.unwrap(), "re: question");
    }

    #[tokio::test]
    async fn test_health_fails_without_key() {
        let base = spawn_fake(fake_openai()).await;
        let mut config = llm_config(&base);
        config.api_key = None;
        let chat = OpenAiChat::new(&config).unwrap();
        assert!(!chat.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let base = spawn_fake(fake_openai()).await;
        let chat = OpenAiChat::new(&llm_config(&base)).unwrap();

        let fragments: Vec<String> = chat
            .stream("вопрос")
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["re: ".to_string(), "вопрос".to_string()]);
    }

    #[tokio::test]
    async fn test_embed_batch_keeps_input_order() {
        let base = spawn_fake(fake_openai()).await;
        let config = EmbeddingConfig {
            backend: BackendProvider::OpenAi,
            base_url: format!("{}/v1", base),
            max_retries: 0,
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::new(&config).unwrap();

        let texts = vec!["a".to_string(), "abc".to_string(), "ab".to_string()];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.5], vec![3.0, 0.5], vec![2.0, 0.5]]);
        assert_eq!(embedder.embed("abcd").await.unwrap(), vec![4.0, 0.5]);
    }
}
