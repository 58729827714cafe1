//! WebSocket chat session
//!
//! The server greets, then answers each text frame in arrival order. Frames
//! that arrive while an answer is being generated wait in the inbox. `/close`
//! ends the session politely (farewell, close code 1000); an unhandled error
//! closes it with code 4001 and the error as reason. A client that goes away
//! mid-generation cancels that generation.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::server::state::AppState;

/// Text frame that ends the session
pub const CLOSE_COMMAND: &str = "/close";
/// Close code for sessions ended by an error
pub const ERROR_CLOSE_CODE: u16 = 4001;
/// Close code for sessions ended by `/close`
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;

type Outbox = SplitSink<WebSocket, Message>;

enum SessionEnd {
    /// The client asked to close
    Farewell,
    /// The client went away
    Disconnected,
}

/// GET /chat/ws_connect - upgrade to a chat session
pub async fn ws_connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| chat_session(socket, state))
}

async fn chat_session(socket: WebSocket, state: AppState) {
    let (mut outbox, mut frames) = socket.split();
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel::<String>();
    let (gone_tx, mut gone) = oneshot::channel::<()>();

    let reader = tokio::spawn(async move {
        let _gone = gone_tx;
        while let Some(Ok(frame)) = frames.next().await {
            match frame {
                Message::Text(text) => {
                    if inbox_tx.send(text).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tracing::info!("Chat session opened");
    let outcome = run_session(&mut outbox, &mut inbox, &mut gone, &state).await;
    reader.abort();

    let close = match outcome {
        Ok(SessionEnd::Farewell) => Some(CloseFrame {
            code: NORMAL_CLOSE_CODE,
            reason: "".into(),
        }),
        Ok(SessionEnd::Disconnected) => None,
        Err(e) => {
            tracing::error!("Chat session failed: {}", e);
            Some(CloseFrame {
                code: ERROR_CLOSE_CODE,
                reason: truncate_reason(&e.to_string()).into(),
            })
        }
    };

    if let Some(frame) = close {
        if let Err(e) = outbox.send(Message::Close(Some(frame))).await {
            tracing::debug!("Could not send close frame: {}", e);
        }
    }
    tracing::info!("Chat session closed");
}

async fn run_session(
    outbox: &mut Outbox,
    inbox: &mut mpsc::UnboundedReceiver<String>,
    gone: &mut oneshot::Receiver<()>,
    state: &AppState,
) -> Result<SessionEnd> {
    let greeting = state.config().server.greeting.clone();
    if outbox.send(Message::Text(greeting)).await.is_err() {
        return Ok(SessionEnd::Disconnected);
    }

    while let Some(text) = inbox.recv().await {
        if text == CLOSE_COMMAND {
            let farewell = state.config().server.farewell.clone();
            if outbox.send(Message::Text(farewell)).await.is_err() {
                return Ok(SessionEnd::Disconnected);
            }
            return Ok(SessionEnd::Farewell);
        }

        let rag = state.orchestrator().await?;
        let answer = tokio::select! {
            answer = rag.get_response(&text) => answer?,
            _ = &mut *gone => {
                tracing::info!("Client disconnected, generation cancelled");
                return Ok(SessionEnd::Disconnected);
            }
        };

        if !answer.is_empty() && outbox.send(Message::Text(answer)).await.is_err() {
            return Ok(SessionEnd::Disconnected);
        }
    }

    Ok(SessionEnd::Disconnected)
}

/// Cut `reason` to the close frame limit on a char boundary
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
