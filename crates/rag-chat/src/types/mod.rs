//! Core types for the RAG chat service

pub mod chat;
pub mod document;

pub use chat::{ChatRequest, ChatResponse, Complexity, GroundingVerdict};
pub use document::{Chunk, Document, Metadata, ScoredChunk};
