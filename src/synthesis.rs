//! Grounded answer synthesis.
//!
//! The prompt puts the retrieved chunks, in ranking order, ahead of the
//! question and tells the model to answer only from them. With no chunks the
//! generator is not called at all and [`INSUFFICIENT_INFORMATION`] is
//! returned.

use std::sync::Arc;

use crate::error::ServiceError;
use crate::generation::GenerationProvider;
use crate::models::RetrievedChunk;
use crate::retry::{with_retry, RetryPolicy};

pub const INSUFFICIENT_INFORMATION: &str =
    "I don't know. The document does not contain information relevant to this question.";

const INSTRUCTION: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer based on the context provided, just say that you don't know, \
don't try to make up an answer.";

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Exactly the chunk indices that were given to the generator, in order.
    pub citations: Vec<usize>,
    /// `false` when the canned answer was returned without a service call.
    pub generated: bool,
}

pub struct AnswerSynthesizer {
    provider: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
}

impl AnswerSynthesizer {
    pub fn new(provider: Arc<dyn GenerationProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn synthesize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<Answer, ServiceError> {
        if chunks.is_empty() {
            tracing::debug!("no context retrieved; returning canned answer");
            return Ok(Answer {
                text: INSUFFICIENT_INFORMATION.to_string(),
                citations: Vec::new(),
                generated: false,
            });
        }

        let prompt = build_prompt(question, chunks);
        let text = with_retry(&self.policy, "generation", || {
            self.provider.complete(&prompt)
        })
        .await?;

        Ok(Answer {
            text,
            citations: chunks.iter().map(|c| c.chunk_index).collect(),
            generated: true,
        })
    }

    /// One bare completion, used by the connectivity check.
    pub async fn ping(&self, prompt: &str) -> Result<String, ServiceError> {
        with_retry(&self.policy, "generation", || self.provider.complete(prompt)).await
    }
}

pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer: ",
        INSTRUCTION,
        context,
        question.trim()
    )
}
