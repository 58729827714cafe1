//! Request and response bodies of the chat endpoints

use serde::{Deserialize, Serialize};

/// Body of `POST /chat` and `POST /chat/stream`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's question
    pub query: String,
}

/// Answer returned by `POST /chat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    /// Generated answer (empty for a blank question)
    pub answer: String,
}

/// How a question is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Answered directly, without retrieval
    Simple,
    /// Rewritten, searched and answered from context
    Complex,
}

/// Grader verdict on whether an answer is supported by its context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingVerdict {
    Grounded,
    NotGrounded,
}
