//! Single-shot and streaming HTTP chat endpoints

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;

use crate::error::Result;
use crate::providers::TextStream;
use crate::server::state::AppState;
use crate::types::{ChatRequest, ChatResponse};

/// POST /chat - answer a question in one response
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    tracing::info!("Query: \"{}\"", request.query);

    let rag = state.orchestrator().await?;
    let answer = rag.get_response(&request.query).await?;

    Ok(Json(ChatResponse { answer }))
}

/// POST /chat/stream - answer a question as server-sent events
///
/// One `message` event per fragment, then `done`. A failure after the
/// stream has started is reported as an `error` event and ends the stream.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    tracing::info!("Streaming query: \"{}\"", request.query);

    let rag = state.orchestrator().await?;
    let fragments = rag.get_stream_response(&request.query).await?;

    Ok(Sse::new(fragment_events(fragments)).keep_alive(KeepAlive::default()))
}

/// SSE data may not contain carriage returns
fn sse_data(text: &str) -> String {
    text.replace('\r', "")
}

fn fragment_events(
    fragments: TextStream,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold(Some(fragments), |fragments| async move {
        let mut fragments = fragments?;
        let event = match fragments.next().await {
            Some(Ok(text)) => {
                return Some((
                    Event::default().event("message").data(sse_data(&text)),
                    Some(fragments),
                ))
            }
            Some(Err(e)) => {
                tracing::error!("Stream failed: {}", e);
                Event::default().event("error").data(sse_data(&e.to_string()))
            }
            None => Event::default().event("done").data(""),
        };
        Some((event, None))
    })
    .map(Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    async fn render(fragments: Vec<Result<String>>) -> Vec<String> {
        fragment_events(futures::stream::iter(fragments).boxed())
            .map(|event| format!("{:?}", event.unwrap()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_fragments_then_done() {
        let events = render(vec![Ok("Hel".to_string()), Ok("lo".to_string())]).await;
        assert_eq!(events.len(), 3);
        assert!(events[0].contains("Hel"));
        assert!(events[2].contains("done"));
    }

    #[tokio::test]
    async fn test_error_ends_stream_without_done() {
        let events = render(vec![
            Ok("partial".to_string()),
            Err(Error::llm("backend went away")),
            Ok("never sent".to_string()),
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].contains("error"));
        assert!(events.iter().all(|e| !e.contains("never sent")));
    }

    #[test]
    fn test_sse_data_strips_carriage_returns() {
        assert_eq!(sse_data("a\r\nb"), "a\nb");
    }
}
