//! Deterministic fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use docqa::config::Config;
use docqa::embedding::EmbeddingProvider;
use docqa::error::ServiceError;
use docqa::generation::GenerationProvider;
use docqa::pipeline::Pipeline;
use docqa::retry::RetryPolicy;
use docqa::store::DocumentStore;

pub const PARIS: &str = "Paris is the capital of France. It is known for the Eiffel Tower.";
pub const PARIS_VOCAB: &[&str] = &[
    "paris", "capital", "france", "known", "eiffel", "tower", "for",
];
pub const ANSWER: &str = "Paris is known for the Eiffel Tower.";

/// Embeds text as counts of each vocabulary word (lowercased, split on
/// non-alphanumerics). Can be scripted to fail the first few calls.
pub struct VocabEmbedder {
    vocab: Vec<String>,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<ServiceError>>,
    gate: Option<Arc<Semaphore>>,
}

impl VocabEmbedder {
    pub fn new(vocab: &[&str]) -> Self {
        Self {
            vocab: vocab.iter().map(|w| w.to_string()).collect(),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    /// Fail the next calls with `errors`, in order.
    pub fn failing_first(self, errors: Vec<ServiceError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    /// Block every call until a permit is available on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.vocab
            .iter()
            .map(|v| words.iter().filter(|w| **w == v.as_str()).count() as f32)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab-count"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| ServiceError::TransientNetwork(e.to_string()))?;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Returns a fixed answer and records every prompt.
#[derive(Default)]
pub struct EchoGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationProvider for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(ANSWER.to_string())
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.chunking.size = 40;
    config.chunking.overlap = 10;
    config.embedding.batch_size = 1;
    config.embedding.max_concurrent_batches = 2;
    config.validate().unwrap();
    config
}

pub fn pipeline(
    config: Config,
    embedder: Arc<VocabEmbedder>,
    generator: Arc<EchoGenerator>,
) -> Arc<Pipeline> {
    let store = Arc::new(DocumentStore::open(&config.storage.data_dir).unwrap());
    Arc::new(Pipeline::with_retry_policy(
        Arc::new(config),
        store,
        embedder,
        generator,
        RetryPolicy::immediate(3),
    ))
}
