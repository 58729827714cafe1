//! Prompt templates and model-output parsing

use serde_json::Value;

use crate::types::{Complexity, GroundingVerdict, ScoredChunk};

/// Prompt builder for the orchestration stages
pub struct PromptBuilder;

impl PromptBuilder {
    /// Join retrieved chunk texts into one context block
    pub fn build_context(results: &[ScoredChunk]) -> String {
        results
            .iter()
            .map(|r| r.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Ask the model whether a question needs retrieval
    pub fn classification(question: &str) -> String {
        format!(
            r#"You are a classifier that determines whether a user's question requires complex reasoning and additional data retrieval or can be answered directly without external resources.
Here is the user's question: {question}

If the question is simple (e.g., a general or straightforward fact), respond with a JSON containing a single key "complexity" with the value "simple".
If the question requires external data, advanced reasoning, or multiple pieces of information, respond with a JSON containing "complexity": "complex".
Provide no other explanation or text. Do not include any preamble, explanation, or additional formatting, such as backticks or code blocks."#
        )
    }

    /// Rewrite a question for vector search, keeping its language
    pub fn rewrite(question: &str) -> String {
        format!(
            r#"You are a question re-writer that converts an input question to a better version that is optimized for vectorstore retrieval.
Look at the initial question and formulate an improved question. Write the improved question in the same language as the initial question.

Here is the initial question:

{question}

Improved question with no preamble:"#
        )
    }

    /// Answer from retrieved context
    pub fn answer(question: &str, context: &str) -> String {
        format!(
            r#"You are a helpful assistant providing accurate and context-aware answers.
Use the provided context to answer the user's question. Be concise and precise.
Answer in the same language as the question.

Context:
{context}

Question:
{question}

Answer:"#
        )
    }

    /// Direct answer without retrieval
    pub fn simple(question: &str) -> String {
        format!(
            "Question: {question}\n\nProvide a short and direct answer to the user question. \
             Answer in the same language as the question."
        )
    }

    /// Grade whether `generation` is supported by `documents`
    pub fn grader(documents: &str, generation: &str) -> String {
        format!(
            r#"You are a grader assessing whether an answer is grounded in / supported by a set of facts.
Here are the facts:
-------
{documents}
-------
Here is the answer: {generation}
Give a binary score 'yes' or 'no' to indicate whether the answer is grounded in / supported by the set of facts.
Provide the binary score as a JSON with a single key "score" and no preamble or explanation."#
        )
    }
}

/// Read the classifier output; anything but `{"complexity": "simple"}` is complex
pub fn parse_complexity(raw: &str) -> Complexity {
    let parsed: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Invalid complexity response: {}", raw);
            return Complexity::Complex;
        }
    };

    match parsed.get("complexity").and_then(Value::as_str) {
        Some("simple") => Complexity::Simple,
        Some("complex") => Complexity::Complex,
        other => {
            tracing::warn!("Unexpected complexity value {:?} in: {}", other, raw);
            Complexity::Complex
        }
    }
}

/// Read the grader output; `None` when it is not a yes/no score
pub fn parse_grade(raw: &str) -> Option<GroundingVerdict> {
    let parsed: Value = serde_json::from_str(raw.trim()).ok()?;
    match parsed.get("score")?.as_str()?.trim().to_lowercase().as_str() {
        "yes" => Some(GroundingVerdict::Grounded),
        "no" => Some(GroundingVerdict::NotGrounded),
        _ => None,
    }
}
