//! Per-question RAG flow
//!
//! ```text
//! Start -> Classify -> SimpleAnswer ------------------------> Done
//!                   -> Rewrite -> Retrieve -> Generate -----> Done
//! ```
//!
//! Each question is independent: no conversation memory is kept.

use futures::{stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::prompt::{parse_complexity, parse_grade, PromptBuilder};
use crate::config::{PipelineConfig, RetrievalConfig};
use crate::error::{Error, Result};
use crate::providers::{ChatModel, TextStream};
use crate::retrieval::VectorStore;
use crate::types::{Complexity, GroundingVerdict};

/// Outcome of a whole-response question
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    /// Trimmed model answer
    pub answer: String,
    /// Path the question took
    pub complexity: Complexity,
    /// Retrieved context (complex path only)
    pub context: Option<String>,
    /// Grader verdict, when the grounding check ran and parsed
    pub verdict: Option<GroundingVerdict>,
}

/// Answers questions against the vector store with a chat model
pub struct RagOrchestrator {
    chat: Arc<dyn ChatModel>,
    store: Arc<VectorStore>,
    top_k: usize,
    pipeline: PipelineConfig,
}

impl RagOrchestrator {
    /// Create an orchestrator over a built vector store
    pub fn new(
        chat: Arc<dyn ChatModel>,
        store: Arc<VectorStore>,
        retrieval: &RetrievalConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            chat,
            store,
            top_k: retrieval.top_k,
            pipeline,
        }
    }

    /// Whole answer for `question`; empty for a blank question
    pub async fn get_response(&self, question: &str) -> Result<String> {
        Ok(self.answer_with_context(question).await?.answer)
    }

    /// Whole answer plus the path taken, context and grader verdict
    pub async fn answer_with_context(&self, question: &str) -> Result<RagAnswer> {
        if question.trim().is_empty() {
            return Ok(RagAnswer {
                answer: String::new(),
                complexity: Complexity::Simple,
                context: None,
                verdict: None,
            });
        }

        match self.classify(question).await? {
            Complexity::Simple => {
                tracing::debug!("Handling as a simple question");
                let answer = self
                    .invoke("simple_answer", &PromptBuilder::simple(question))
                    .await?;
                Ok(RagAnswer {
                    answer: answer.trim().to_string(),
                    complexity: Complexity::Simple,
                    context: None,
                    verdict: None,
                })
            }
            Complexity::Complex => {
                let rewritten = self.rewrite(question).await?;
                let context = self.retrieve(&rewritten).await?;
                let answer = self
                    .invoke("generate", &PromptBuilder::answer(question, &context))
                    .await?
                    .trim()
                    .to_string();

                let verdict = if self.pipeline.grounding_check {
                    self.grade(&context, &answer).await
                } else {
                    None
                };

                Ok(RagAnswer {
                    answer,
                    complexity: Complexity::Complex,
                    context: Some(context),
                    verdict,
                })
            }
        }
    }

    /// Answer for `question` as a stream of fragments
    ///
    /// Classification, rewrite and retrieval finish before the stream is
    /// returned; only generation is streamed. A blank question yields an
    /// empty stream.
    pub async fn get_stream_response(&self, question: &str) -> Result<TextStream> {
        if question.trim().is_empty() {
            return Ok(futures::stream::empty().boxed());
        }

        let prompt = match self.classify(question).await? {
            Complexity::Simple => PromptBuilder::simple(question),
            Complexity::Complex => {
                let rewritten = self.rewrite(question).await?;
                let context = self.retrieve(&rewritten).await?;
                PromptBuilder::answer(question, &context)
            }
        };

        let stream = self
            .timed("stream_open", self.chat.stream(&prompt))
            .await?;
        Ok(self.with_fragment_timeout(stream))
    }

    /// Classify the question; malformed classifier output counts as complex
    pub async fn classify(&self, question: &str) -> Result<Complexity> {
        if !self.pipeline.classify {
            return Ok(Complexity::Complex);
        }
        let raw = self
            .invoke("classify", &PromptBuilder::classification(question))
            .await?;
        let complexity = parse_complexity(&raw);
        tracing::info!("Complexity classification: {:?}", complexity);
        Ok(complexity)
    }

    /// Rewrite the question for retrieval
    pub async fn rewrite(&self, question: &str) -> Result<String> {
        let rewritten = self
            .invoke("rewrite", &PromptBuilder::rewrite(question))
            .await?
            .trim()
            .to_string();
        tracing::debug!("Rewritten question: {}", rewritten);
        Ok(rewritten)
    }

    /// Context for `query`: the texts of the top MMR hits joined by blank lines
    pub async fn retrieve(&self, query: &str) -> Result<String> {
        let vector = self.timed("embed", self.store.embed_query(query)).await?;
        let results = self.timed("search", self.store.search(&vector, self.top_k)).await?;
        tracing::debug!("Retrieved {} chunks", results.len());
        Ok(PromptBuilder::build_context(&results))
    }

    /// Grade an answer against its context; failures only log
    async fn grade(&self, context: &str, answer: &str) -> Option<GroundingVerdict> {
        let raw = match self
            .invoke("grade", &PromptBuilder::grader(context, answer))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Grounding check failed: {}", e);
                return None;
            }
        };

        let verdict = parse_grade(&raw);
        match verdict {
            Some(GroundingVerdict::NotGrounded) => {
                tracing::warn!("Answer is not grounded in the retrieved context")
            }
            Some(GroundingVerdict::Grounded) => tracing::debug!("Answer is grounded"),
            None => tracing::warn!("Invalid grader response: {}", raw),
        }
        verdict
    }

    async fn invoke(&self, stage: &'static str, prompt: &str) -> Result<String> {
        self.timed(stage, self.chat.invoke(prompt)).await
    }

    async fn timed<T>(&self, stage: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let secs = self.pipeline.call_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("{} timed out after {}s", stage, secs);
                Err(Error::Timeout { stage, secs })
            }
        }
    }

    /// Bound the wait for each fragment; the stream ends after its first error
    fn with_fragment_timeout(&self, fragments: TextStream) -> TextStream {
        let secs = self.pipeline.call_timeout_secs;
        let limit = Duration::from_secs(secs);

        // `None` once the inner stream has finished or failed; it is never polled again
        stream::unfold(Some(fragments), move |inner| async move {
            let mut inner = inner?;
            match tokio::time::timeout(limit, inner.next()).await {
                Ok(Some(Ok(fragment))) => Some((Ok(fragment), Some(inner))),
                Ok(Some(Err(e))) => {
                    tracing::error!("Stream failed: {}", e);
                    Some((Err(e), None))
                }
                Ok(None) => None,
                Err(_) => {
                    tracing::error!("stream timed out after {}s", secs);
                    Some((Err(Error::Timeout { stage: "stream", secs }), None))
                }
            }
        })
        .boxed()
    }
}
