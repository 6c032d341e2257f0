//! Orchestration of the indexing and query paths.
//!
//! # Processing
//!
//! ```text
//! Uploaded → Extracting → Chunking → Embedding → Indexed
//!     └──────────┴────────────┴──────────┴──→ Failed { stage, reason }
//! ```
//!
//! [`Pipeline::process`] holds the document's write lock for the whole run, so
//! a concurrent request for the same filename is rejected with
//! [`Error::ReprocessingInProgress`]. The previous generation stays queryable
//! until the new one is committed. Dropping the future mid-run releases the
//! lock and leaves the status at the last stage reached.
//!
//! # Querying
//!
//! [`Pipeline::query`] takes no lock: it clones the current
//! `Arc<IndexedDocument>` and works on that snapshot.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{Embedder, EmbeddingProvider, OpenAIProvider};
use crate::error::{DocumentError, Error, ServiceError, Stage};
use crate::extract::{content_type_for, extract_text};
use crate::generation::{GenerationProvider, OpenAIChatProvider};
use crate::index::VectorIndex;
use crate::models::{Document, DocumentStatus, DocumentSummary, QueryResult};
use crate::retrieval::RetrievalEngine;
use crate::retry::RetryPolicy;
use crate::store::DocumentStore;
use crate::synthesis::AnswerSynthesizer;

/// Longest accepted filename, in bytes. Keeps the hex-encoded directory name
/// within common filesystem limits.
const MAX_FILENAME_BYTES: usize = 120;

/// Prompt sent by [`Pipeline::check`].
const CHECK_PROMPT: &str = "Say 'Hello World'";

/// Result of a successful [`Pipeline::process`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub filename: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    pub dims: usize,
    pub processed_at: DateTime<Utc>,
}

/// Result of [`Pipeline::check`]. Each side is checked independently.
#[derive(Debug)]
pub struct CheckReport {
    pub embedding_model: String,
    pub embedding: Result<usize, ServiceError>,
    pub generation_model: String,
    pub generation: Result<String, ServiceError>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.embedding.is_ok() && self.generation.is_ok()
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<DocumentStore>,
    embedder: Arc<Embedder>,
    retrieval: RetrievalEngine,
    synthesizer: AnswerSynthesizer,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<DocumentStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self::with_retry_policy(config, store, embedding, generation, policy)
    }

    /// Like [`new`](Self::new) with an explicit retry policy for both services.
    pub fn with_retry_policy(
        config: Arc<Config>,
        store: Arc<DocumentStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
        policy: RetryPolicy,
    ) -> Self {
        let embedder = Arc::new(Embedder::new(embedding, &config.embedding, policy.clone()));
        let retrieval =
            RetrievalEngine::new(embedder.clone(), store.clone(), config.retrieval.min_score);
        let synthesizer = AnswerSynthesizer::new(generation, policy);
        Self {
            config,
            store,
            embedder,
            retrieval,
            synthesizer,
        }
    }

    /// Open the store under `[storage].data_dir` and wire up the
    /// OpenAI-compatible providers.
    pub fn from_config(config: Arc<Config>, api_key: String) -> anyhow::Result<Self> {
        let store = Arc::new(DocumentStore::open(&config.storage.data_dir)?);
        let embedding = Arc::new(OpenAIProvider::new(
            &config.provider,
            &config.embedding,
            &config.retry,
            api_key.clone(),
        )?);
        let generation = Arc::new(OpenAIChatProvider::new(
            &config.provider,
            &config.generation,
            &config.retry,
            api_key,
        )?);
        Ok(Self::new(config, store, embedding, generation))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Extract, chunk, embed and index `bytes` as `filename`, replacing any
    /// previous version once the new index is committed.
    pub async fn process(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ProcessOutcome, DocumentError> {
        validate_filename(filename)
            .map_err(|e| DocumentError::new(filename, Stage::Uploaded, e))?;
        let content_type = content_type_for(filename).ok_or_else(|| {
            DocumentError::new(
                filename,
                Stage::Uploaded,
                Error::InvalidRequest("only .pdf and .txt files are supported".to_string()),
            )
        })?;

        let guard = self
            .store
            .lock_for_write(filename)
            .await
            .map_err(|e| DocumentError::new(filename, Stage::Uploaded, e))?;

        tracing::info!(document = filename, bytes = bytes.len(), "processing document");
        self.store
            .set_status(filename, DocumentStatus::Uploaded)
            .await;

        // Extracting
        self.store
            .set_status(filename, DocumentStatus::Extracting)
            .await;
        let text = match tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(self.fail(filename, Stage::Extracting, e.into()).await),
            Err(e) => {
                let err = Error::Io(std::io::Error::other(e));
                return Err(self.fail(filename, Stage::Extracting, err).await);
            }
        };
        tracing::debug!(document = filename, chars = text.chars().count(), "text extracted");

        // Chunking
        self.store
            .set_status(filename, DocumentStatus::Chunking)
            .await;
        let chunking = &self.config.chunking;
        let mut chunks = match chunk_text(&text, chunking.size, chunking.overlap) {
            Ok(chunks) => chunks,
            Err(e) => return Err(self.fail(filename, Stage::Chunking, e.into()).await),
        };
        tracing::debug!(document = filename, chunks = chunks.len(), "text chunked");

        // Embedding
        self.store
            .set_status(filename, DocumentStatus::Embedding)
            .await;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let report = match self.embedder.embed(&texts).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(filename, Stage::Embedding, Error::Embedding(e)).await),
        };
        if !report.is_complete() {
            let err = Error::Embedding(ServiceError::InvalidInput(report.describe_failures()));
            return Err(self.fail(filename, Stage::Embedding, err).await);
        }
        for (chunk, vector) in chunks.iter_mut().zip(report.vectors) {
            chunk.embedding = vector;
        }

        // Indexing
        let index = match VectorIndex::build(&chunks) {
            Ok(index) => index,
            Err(e) => return Err(self.fail(filename, Stage::Indexing, e).await),
        };
        for chunk in &mut chunks {
            chunk.embedding = None;
        }
        let document = Document {
            filename: filename.to_string(),
            text,
            chunks,
            chunk_size: chunking.size,
            chunk_overlap: chunking.overlap,
            embedding_model: self.embedder.model_name().to_string(),
            processed_at: Utc::now(),
        };
        let indexed = match self.store.commit(&guard, document, index).await {
            Ok(indexed) => indexed,
            Err(e) => return Err(self.fail(filename, Stage::Indexing, e).await),
        };

        self.store
            .set_status(filename, DocumentStatus::Indexed)
            .await;
        tracing::info!(
            document = filename,
            chunks = indexed.index.len(),
            dims = indexed.index.dims(),
            "document indexed"
        );

        Ok(ProcessOutcome {
            filename: filename.to_string(),
            status: DocumentStatus::Indexed,
            chunks: indexed.index.len(),
            dims: indexed.index.dims(),
            processed_at: indexed.document.processed_at,
        })
    }

    /// Answer `question` from `filename`, or from the most recently processed
    /// document when no filename is given. `k` defaults to `[retrieval].top_k`.
    pub async fn query(
        &self,
        question: &str,
        filename: Option<&str>,
        k: Option<usize>,
    ) -> Result<QueryResult, DocumentError> {
        let target = filename.unwrap_or("<most recent>");
        if question.trim().is_empty() {
            return Err(DocumentError::new(
                target,
                Stage::Retrieving,
                Error::InvalidRequest("question must not be empty".to_string()),
            ));
        }

        let doc = match filename {
            Some(name) => self.store.get(name).await,
            None => self.store.most_recent().await,
        }
        .ok_or_else(|| {
            DocumentError::new(target, Stage::Retrieving, Error::IndexNotFound(target.to_string()))
        })?;
        let filename = doc.document.filename.as_str();

        let k = k.unwrap_or(self.config.retrieval.top_k);
        let retrieval = self
            .retrieval
            .retrieve_in(&doc, question, k)
            .await
            .map_err(|e| DocumentError::new(filename, Stage::Retrieving, e))?;

        let answer = self
            .synthesizer
            .synthesize(question, retrieval.chunks())
            .await
            .map_err(|e| DocumentError::new(filename, Stage::Generating, Error::Generation(e)))?;

        tracing::info!(
            document = filename,
            context_chunks = answer.citations.len(),
            generated = answer.generated,
            "question answered"
        );

        Ok(QueryResult {
            question: question.to_string(),
            filename: filename.to_string(),
            ranked: retrieval.into_chunks(),
            answer: answer.text,
            citations: answer.citations,
        })
    }

    /// Remove a document and its persisted index. `Ok(false)` if unknown.
    pub async fn delete(&self, filename: &str) -> Result<bool, DocumentError> {
        let guard = self
            .store
            .lock_for_write(filename)
            .await
            .map_err(|e| DocumentError::new(filename, Stage::Deleting, e))?;
        self.store
            .remove(&guard)
            .await
            .map_err(|e| DocumentError::new(filename, Stage::Deleting, e))
    }

    pub async fn list(&self) -> Vec<DocumentSummary> {
        self.store.list().await
    }

    /// Round-trip both services once.
    pub async fn check(&self) -> CheckReport {
        let embedding = self.embedder.embed_query("test").await.map(|v| v.len());
        let generation = self.synthesizer.ping(CHECK_PROMPT).await;
        CheckReport {
            embedding_model: self.embedder.model_name().to_string(),
            embedding,
            generation_model: self.synthesizer.model_name().to_string(),
            generation,
        }
    }

    async fn fail(&self, filename: &str, stage: Stage, err: Error) -> DocumentError {
        tracing::error!(document = filename, stage = %stage, error = %err, "processing failed");
        self.store
            .set_status(
                filename,
                DocumentStatus::Failed {
                    stage,
                    reason: err.to_string(),
                },
            )
            .await;
        DocumentError::new(filename, stage, err)
    }
}

fn validate_filename(filename: &str) -> Result<(), Error> {
    if filename.trim().is_empty() {
        return Err(Error::InvalidRequest("filename must not be empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(Error::InvalidRequest(format!(
            "filename is longer than {} bytes",
            MAX_FILENAME_BYTES
        )));
    }
    if filename.contains(['/', '\\']) || filename.chars().any(char::is_control) {
        return Err(Error::InvalidRequest(
            "filename must not contain path separators or control characters".to_string(),
        ));
    }
    Ok(())
}

/// Filename part of `path`, used as the document identity by the CLI.
pub fn document_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
