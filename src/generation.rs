//! Text-generation providers.
//!
//! [`GenerationProvider`] is one completion round trip; retry lives in
//! [`crate::synthesis::AnswerSynthesizer`]. [`OpenAIChatProvider`] talks to
//! `POST {base_url}/chat/completions` on any OpenAI-compatible API.

use async_trait::async_trait;

use crate::config::{GenerationConfig, ProviderConfig, RetryConfig};
use crate::error::ServiceError;
use crate::openai::ApiClient;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` in a single request. Implementations do not retry.
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

pub struct OpenAIChatProvider {
    client: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIChatProvider {
    pub fn new(
        provider: &ProviderConfig,
        generation: &GenerationConfig,
        retry: &RetryConfig,
        api_key: String,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: ApiClient::new(&provider.base_url, api_key, retry.timeout())?,
            model: generation.model.clone(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = self.client.post_json("chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

/// Extracts `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ServiceError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            ServiceError::InvalidResponse("missing choices[0].message.content".to_string())
        })?;
    Ok(content.trim().to_string())
}
