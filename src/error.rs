//! Error taxonomy for the indexing and query pipeline.
//!
//! Stage-specific errors ([`ExtractError`], [`ChunkError`], [`ServiceError`])
//! fold into the crate-wide [`Error`]. The pipeline wraps an [`Error`] in a
//! [`DocumentError`] naming the document and the [`Stage`] that failed, so a
//! caller can always tell the user *what* broke and *where*.
//!
//! "No relevant content" is not an error; it is the
//! [`crate::retrieval::Retrieval::NoRelevantContent`] outcome.

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Text extraction failures. Deterministic, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    Unsupported(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("document is encrypted")]
    Encrypted,

    #[error("document contains no extractable text")]
    Empty,
}

/// Invalid chunking parameters.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be > 0")]
    ZeroSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Failure talking to an external model service (embeddings or generation).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid response from service: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Rate limits and network errors; everything else is returned at once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimit(_) | ServiceError::TransientNetwork(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkError),

    #[error("embedding service: {0}")]
    Embedding(ServiceError),

    #[error("generation service: {0}")]
    Generation(ServiceError),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error("no index found for document '{0}'")]
    IndexNotFound(String),

    #[error("index at {path} is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("document '{0}' is already being processed")]
    ReprocessingInProgress(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline stage, used both as the document state machine and as error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploaded,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Retrieving,
    Generating,
    Deleting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uploaded => "upload",
            Stage::Extracting => "extraction",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Retrieving => "retrieval",
            Stage::Generating => "generation",
            Stage::Deleting => "deletion",
        };
        f.write_str(name)
    }
}

/// An [`Error`] tagged with the document it concerns and the stage that failed.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed for document '{document}': {source}")]
pub struct DocumentError {
    pub document: String,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl DocumentError {
    pub fn new(document: impl Into<String>, stage: Stage, source: impl Into<Error>) -> Self {
        Self {
            document: document.into(),
            stage,
            source: source.into(),
        }
    }
}
