//! End-to-end tests over a served router with in-process model fakes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use rag_chat::config::RagConfig;
use rag_chat::providers::{ChatModel, EmbeddingProvider, TextStream};
use rag_chat::retrieval::{HnswIndex, VectorStore};
use rag_chat::server::{build_router, state::AppState};
use rag_chat::{Chunk, Document, Error, RagOrchestrator, Result};

/// Keyword-count embeddings, enough to tell the two documents apart
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(vec![
            text.matches("болт").count() as f32,
            text.matches("гайк").count() as f32,
            0.1,
        ])
    }

    fn model(&self) -> String {
        "keyword".to_string()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Answers by recognising which prompt it was given
struct ScriptedChat;

impl ScriptedChat {
    fn reply(prompt: &str) -> String {
        if prompt.contains("classifier") {
            r#"{"complexity": "complex"}"#.to_string()
        } else if prompt.contains("re-writer") {
            "цена болта М8".to_string()
        } else if prompt.contains("grader") {
            r#"{"score": "yes"}"#.to_string()
        } else if prompt.contains("3 рубля") {
            "  Болт М8 стоит 3 рубля.\n".to_string()
        } else {
            "Нет данных.".to_string()
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        Ok(Self::reply(prompt))
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let words: Vec<Result<String>> = Self::reply(prompt)
            .trim()
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// A chat backend that is down
struct DownChat;

#[async_trait]
impl ChatModel for DownChat {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        Err(Error::llm("connection refused"))
    }

    async fn stream(&self, _prompt: &str) -> Result<TextStream> {
        Err(Error::llm("connection refused"))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Never finishes a call; reports when a call starts and when it is dropped
#[derive(Default)]
struct HangingChat {
    started: Notify,
    dropped: Arc<Notify>,
}

/// Signals `dropped` when the in-flight call is abandoned
struct InFlight(Arc<Notify>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

#[async_trait]
impl ChatModel for HangingChat {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        let _in_flight = InFlight(Arc::clone(&self.dropped));
        self.started.notify_one();
        futures::future::pending::<()>().await;
        Ok(String::new())
    }

    async fn stream(&self, _prompt: &str) -> Result<TextStream> {
        Ok(futures::stream::pending().boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

async fn orchestrator(chat: Arc<dyn ChatModel>, config: &RagConfig) -> Arc<RagOrchestrator> {
    let embedder = Arc::new(KeywordEmbedder);
    let doc = Document::new("").with_metadata("source", "prices.xlsx");

    let mut embedded = Vec::new();
    for (i, text) in ["Болт М8 стоит 3 рубля", "Гайка М8 стоит 1 рубль"].iter().enumerate() {
        let vector = embedder.embed(text).await.unwrap();
        embedded.push((Chunk::new(&doc, text.to_string(), i * 100), vector));
    }

    let store = VectorStore::new(
        embedder,
        Arc::new(HnswIndex::build(embedded, config.retrieval.hnsw()).unwrap()),
        config.retrieval.clone(),
    );
    Arc::new(RagOrchestrator::new(
        chat,
        Arc::new(store),
        &config.retrieval,
        config.pipeline.clone(),
    ))
}

async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    addr.to_string()
}

async fn ready_server(chat: Arc<dyn ChatModel>) -> String {
    let config = RagConfig::default();
    let rag = orchestrator(chat, &config).await;
    serve(AppState::with_orchestrator(config, rag)).await
}

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Next text or close frame, skipping control frames
async fn next_frame(ws: &mut Client) -> Message {
    loop {
        match ws.next().await {
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(frame)) => return frame,
            other => panic!("unexpected end of session: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_session_greets_answers_and_says_goodbye() {
    let addr = ready_server(Arc::new(ScriptedChat)).await;
    let (mut ws, _) = connect_async(format!("ws://{}/chat/ws_connect", addr))
        .await
        .unwrap();

    assert_eq!(
        next_frame(&mut ws).await,
        Message::Text("Добрый день! Задайте свой вопрос.".to_string())
    );

    ws.send(Message::Text("Сколько стоит болт М8?".to_string()))
        .await
        .unwrap();
    assert_eq!(
        next_frame(&mut ws).await,
        Message::Text("Болт М8 стоит 3 рубля.".to_string())
    );

    ws.send(Message::Text("/close".to_string())).await.unwrap();
    assert_eq!(
        next_frame(&mut ws).await,
        Message::Text("Рад был помочь!".to_string())
    );

    match next_frame(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_queued_questions_answered_in_order() {
    let addr = ready_server(Arc::new(ScriptedChat)).await;
    let (mut ws, _) = connect_async(format!("ws://{}/chat/ws_connect", addr))
        .await
        .unwrap();
    next_frame(&mut ws).await;

    ws.send(Message::Text("болт?".to_string())).await.unwrap();
    ws.send(Message::Text("гайка?".to_string())).await.unwrap();
    ws.send(Message::Text("/close".to_string())).await.unwrap();

    let mut texts = Vec::new();
    loop {
        match next_frame(&mut ws).await {
            Message::Text(text) => texts.push(text),
            Message::Close(_) => break,
            other => panic!("unexpected frame {:?}", other),
        }
    }
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[2], "Рад был помочь!");
}

#[tokio::test]
async fn test_backend_failure_closes_with_error_code() {
    let addr = ready_server(Arc::new(DownChat)).await;
    let (mut ws, _) = connect_async(format!("ws://{}/chat/ws_connect", addr))
        .await
        .unwrap();
    next_frame(&mut ws).await;

    ws.send(Message::Text("Сколько стоит болт?".to_string()))
        .await
        .unwrap();
    match next_frame(&mut ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4001);
            assert!(frame.reason.contains("connection refused"));
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_ready_service() {
    let mut config = RagConfig::default();
    config.server.index_wait_secs = 0;
    let addr = serve(AppState::new(config)).await;

    let client = reqwest::Client::new();
    let ready = client.get(format!("http://{}/ready", addr)).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let chat = client
        .post(format!("http://{}/chat", addr))
        .json(&serde_json::json!({ "query": "болт?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(chat.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let (mut ws, _) = connect_async(format!("ws://{}/chat/ws_connect", addr))
        .await
        .unwrap();
    next_frame(&mut ws).await;
    ws.send(Message::Text("болт?".to_string())).await.unwrap();
    match next_frame(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4001),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_endpoints() {
    let addr = ready_server(Arc::new(ScriptedChat)).await;
    let client = reqwest::Client::new();

    let hello = client.get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(hello.text().await.unwrap(), "Hi there!");

    let health = client.get(format!("http://{}/health", addr)).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");

    let ready = client.get(format!("http://{}/ready", addr)).send().await.unwrap();
    assert!(ready.status().is_success());

    let answer: serde_json::Value = client
        .post(format!("http://{}/chat", addr))
        .json(&serde_json::json!({ "query": "Сколько стоит болт М8?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["answer"], "Болт М8 стоит 3 рубля.");

    let blank: serde_json::Value = client
        .post(format!("http://{}/chat", addr))
        .json(&serde_json::json!({ "query": "   " }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(blank["answer"], "");

    let events = client
        .post(format!("http://{}/chat/stream", addr))
        .json(&serde_json::json!({ "query": "Сколько стоит болт М8?" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(events.contains("event: message"));
    assert!(events.contains("data: Болт"));
    assert!(events.contains("event: done"));
    assert!(!events.contains("event: error"));
}

#[tokio::test]
async fn test_disconnect_cancels_generation() {
    let chat = Arc::new(HangingChat::default());
    let config = RagConfig::default();
    let rag = orchestrator(Arc::clone(&chat) as Arc<dyn ChatModel>, &config).await;
    let addr = serve(AppState::with_orchestrator(config, Arc::clone(&rag))).await;

    let (mut ws, _) = connect_async(format!("ws://{}/chat/ws_connect", addr))
        .await
        .unwrap();
    next_frame(&mut ws).await;
    ws.send(Message::Text("Сколько стоит болт?".to_string()))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), chat.started.notified())
        .await
        .expect("generation never started");
    // held by this test, the ready state and the open session
    assert_eq!(Arc::strong_count(&rag), 3);

    drop(ws);

    tokio::time::timeout(Duration::from_secs(5), chat.dropped.notified())
        .await
        .expect("generation was not cancelled");
    tokio::time::timeout(Duration::from_secs(5), async {
        while Arc::strong_count(&rag) > 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session did not end");
}
