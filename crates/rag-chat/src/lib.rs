//! rag-chat: retrieval-augmented question answering over a folder of documents
//!
//! Word and Excel files are split, extracted and chunked into an embedding
//! index at startup. Questions arrive over HTTP or a WebSocket session and are
//! answered by a chat model from the most relevant, diverse chunks.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::{RagAnswer, RagOrchestrator};
pub use providers::Providers;
pub use server::RagServer;
pub use types::{
    chat::{ChatRequest, ChatResponse, Complexity},
    document::{Chunk, Document, ScoredChunk},
};
