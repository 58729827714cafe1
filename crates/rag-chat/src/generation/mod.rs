//! Answer generation: prompt templates and the RAG orchestrator

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{RagAnswer, RagOrchestrator};
pub use prompt::PromptBuilder;
