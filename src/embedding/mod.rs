//! Embedding provider abstraction and the batching [`Embedder`].
//!
//! - **[`EmbeddingProvider`]**: one round trip to an embedding service.
//! - **[`OpenAIProvider`]**: `POST {base_url}/embeddings` on any
//!   OpenAI-compatible API.
//! - **[`Embedder`]**: splits inputs into batches, runs up to
//!   `max_concurrent_batches` of them at once through the retry policy, and
//!   reassembles the vectors in input order.
//!
//! # Partial failure
//!
//! Blank inputs, and inputs the service rejects as invalid, fail on their own:
//! [`Embedder::embed`] returns an [`EmbeddingReport`] with `None` in their slot
//! and an [`EmbeddingFailure`] naming them. Only auth failures, exhausted
//! retries and malformed responses abort the whole call.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::config::{EmbeddingConfig, ProviderConfig, RetryConfig};
use crate::error::ServiceError;
use crate::openai::ApiClient;
use crate::retry::{with_retry, RetryPolicy};

/// A service that turns a batch of texts into vectors, one per text, in order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;

    /// Embed `texts` in a single request. Implementations do not retry.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI embeddings API (or a compatible server).
pub struct OpenAIProvider {
    client: ApiClient,
    model: String,
}

impl OpenAIProvider {
    pub fn new(
        provider: &ProviderConfig,
        embedding: &EmbeddingConfig,
        retry: &RetryConfig,
        api_key: String,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: ApiClient::new(&provider.base_url, api_key, retry.timeout())?,
            model: embedding.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.client.post_json("embeddings", &body).await?;
        parse_openai_response(&json)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    let invalid = |msg: &str| ServiceError::InvalidResponse(msg.to_string());

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        let vector = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| invalid("non-numeric embedding value"))?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Embedder ============

/// An input the embedder could not turn into a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFailure {
    /// Position in the input slice.
    pub index: usize,
    pub error: ServiceError,
}

/// Result of [`Embedder::embed`]: `vectors[i]` belongs to input `i`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingReport {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failures: Vec<EmbeddingFailure>,
}

impl EmbeddingReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line description of every failed input, for error messages.
    pub fn describe_failures(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("input {}: {}", f.index, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Batched, concurrent, retrying front end to an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent_batches: usize,
    policy: RetryPolicy,
    /// Fixed by the first vector the service returns.
    dims: OnceLock<usize>,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            policy,
            dims: OnceLock::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed every text, reporting per-input failures instead of aborting.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingReport, ServiceError> {
        let mut report = EmbeddingReport {
            vectors: vec![None; texts.len()],
            failures: Vec::new(),
        };

        let mut valid: Vec<(usize, String)> = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                report.failures.push(EmbeddingFailure {
                    index: i,
                    error: ServiceError::InvalidInput("empty text".to_string()),
                });
            } else {
                valid.push((i, text.clone()));
            }
        }

        let batches: Vec<Vec<(usize, String)>> = valid
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        tracing::debug!(
            inputs = texts.len(),
            batches = batches.len(),
            model = self.model_name(),
            "embedding"
        );

        // `buffered` runs batches concurrently but yields them in input order.
        // Returning early drops the stream and with it every pending batch.
        let mut results = std::pin::pin!(stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
                let outcome = self.run_batch(&texts).await;
                (batch, outcome)
            })
            .buffered(self.max_concurrent_batches));

        while let Some((batch, outcome)) = results.next().await {
            match outcome {
                Ok(vectors) => {
                    for ((i, _), vector) in batch.into_iter().zip(vectors) {
                        report.vectors[i] = Some(vector);
                    }
                }
                Err(ServiceError::InvalidInput(_)) if batch.len() > 1 => {
                    // The service rejected the batch as a whole; isolate the culprits.
                    for (i, text) in batch {
                        match self.run_batch(std::slice::from_ref(&text)).await {
                            Ok(mut vectors) => report.vectors[i] = vectors.pop(),
                            Err(error @ ServiceError::InvalidInput(_)) => {
                                report.failures.push(EmbeddingFailure { index: i, error })
                            }
                            Err(error) => return Err(error),
                        }
                    }
                }
                Err(error @ ServiceError::InvalidInput(_)) => {
                    if let Some((i, _)) = batch.first() {
                        report.failures.push(EmbeddingFailure { index: *i, error });
                    }
                }
                Err(error) => return Err(error),
            }
        }

        report.failures.sort_by_key(|f| f.index);
        Ok(report)
    }

    /// Embed a single text (e.g. a question).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("empty text".to_string()));
        }
        self.run_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn run_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let vectors = with_retry(&self.policy, "embeddings", || {
            self.provider.embed_batch(texts)
        })
        .await?;

        if vectors.len() != texts.len() {
            return Err(ServiceError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            self.check_dims(vector.len())?;
        }
        Ok(vectors)
    }

    fn check_dims(&self, len: usize) -> Result<(), ServiceError> {
        if len == 0 {
            return Err(ServiceError::InvalidResponse(
                "zero-length embedding".to_string(),
            ));
        }
        let fixed = *self.dims.get_or_init(|| len);
        if fixed != len {
            return Err(ServiceError::InvalidResponse(format!(
                "embedding has {} dimensions, service previously returned {}",
                len, fixed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Vector = [text length, first byte]; records every batch it sees.
    struct RecordingProvider {
        batches: Mutex<Vec<Vec<String>>>,
        reject_containing: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl RecordingProvider {
        fn new(reject_containing: Option<&'static str>) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                reject_containing,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.to_vec());
            if let Some(bad) = self.reject_containing {
                if texts.iter().any(|t| t.contains(bad)) {
                    return Err(ServiceError::InvalidInput("too long".into()));
                }
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.as_bytes()[0] as f32])
                .collect())
        }
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Embedder {
        let config = EmbeddingConfig {
            batch_size,
            max_concurrent_batches: 3,
            ..EmbeddingConfig::default()
        };
        Embedder::new(provider, &config, RetryPolicy::immediate(2))
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [2.0, 2.0]},
                {"index": 0, "embedding": [1.0, 1.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn parse_response_rejects_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"object": "list"})).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn preserves_order_across_batches() {
        let provider = Arc::new(RecordingProvider::new(None));
        let e = embedder(provider.clone(), 2);
        let input = texts(&["a", "bb", "ccc", "dddd", "eeeee"]);
        let report = e.embed(&input).await.unwrap();

        assert!(report.is_complete());
        let lens: Vec<f32> = report.vectors.iter().map(|v| v.as_ref().unwrap()[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(report.vectors.iter().all(|v| v.as_ref().unwrap().len() == 2));
    }

    #[tokio::test]
    async fn blank_inputs_fail_individually() {
        let provider = Arc::new(RecordingProvider::new(None));
        let e = embedder(provider.clone(), 8);
        let report = e.embed(&texts(&["alpha", "  ", "gamma"])).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(report.vectors[0].is_some());
        assert!(report.vectors[1].is_none());
        assert!(report.vectors[2].is_some());
        // The blank text never reaches the service.
        let sent = provider.batches.lock().unwrap().clone();
        assert_eq!(sent, vec![texts(&["alpha", "gamma"])]);
    }

    #[tokio::test]
    async fn rejected_batch_is_split_to_find_bad_item() {
        let provider = Arc::new(RecordingProvider::new(Some("BAD")));
        let e = embedder(provider, 4);
        let report = e.embed(&texts(&["one", "BAD two", "three"])).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(report.vectors[0].is_some());
        assert!(report.vectors[2].is_some());
        assert!(report.describe_failures().contains("input 1"));
    }

    struct AuthFailProvider;

    #[async_trait]
    impl EmbeddingProvider for AuthFailProvider {
        fn model_name(&self) -> &str {
            "auth-fail"
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Err(ServiceError::Auth("invalid api key".into()))
        }
    }

    #[tokio::test]
    async fn auth_failure_aborts() {
        let e = embedder(Arc::new(AuthFailProvider), 4);
        let err = e.embed(&texts(&["x", "y"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    struct ShiftingDimsProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for ShiftingDimsProvider {
        fn model_name(&self) -> &str {
            "shifting"
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            let dims = 2 + self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0; dims]).collect())
        }
    }

    #[tokio::test]
    async fn dimensionality_is_fixed_by_first_response() {
        let e = embedder(
            Arc::new(ShiftingDimsProvider {
                calls: AtomicUsize::new(0),
            }),
            4,
        );
        assert_eq!(e.embed_query("first").await.unwrap().len(), 2);
        let err = e.embed_query("second").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn blank_query_is_invalid_input() {
        let e = embedder(Arc::new(RecordingProvider::new(None)), 4);
        assert!(matches!(
            e.embed_query("   ").await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
