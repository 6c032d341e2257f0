//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, and query results that flow
//! through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Stage;

/// A contiguous slice of a document's extracted text.
///
/// Offsets are character (not byte) positions into the source text, half-open:
/// `text == source.chars().skip(start).take(end - start)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the document's chunk sequence.
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Filled in by the embedding stage; persisted in the index, not here.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// An indexed document as persisted alongside its vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique key: the uploaded filename.
    pub filename: String,
    /// Cleaned text produced by extraction.
    pub text: String,
    pub chunks: Vec<Chunk>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub processed_at: DateTime<Utc>,
}

impl Document {
    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }
}

/// Per-document processing state.
///
/// `Uploaded → Extracting → Chunking → Embedding → Indexed`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Extracting,
    Chunking,
    Embedding,
    Indexed,
    Failed { stage: Stage, reason: String },
}

impl DocumentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed { .. } => "failed",
        }
    }
}

/// A chunk returned by retrieval, with its similarity to the question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_index: usize,
    pub score: f32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// The full outcome of answering one question. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub filename: String,
    /// Ranked retrieval results after the similarity floor was applied.
    pub ranked: Vec<RetrievedChunk>,
    pub answer: String,
    /// Chunk indices handed to the generator as context, in ranking order.
    pub citations: Vec<usize>,
}

impl QueryResult {
    /// True when retrieval found nothing above the similarity floor.
    pub fn no_relevant_content(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Registry entry describing one known document.
///
/// While a document has a queryable generation its `status` stays `Indexed`;
/// a reprocess that is still running, or that failed, shows up in
/// `last_attempt` instead.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DocumentStatus>,
    /// Chunk count of the currently queryable generation, if any.
    pub chunks: Option<usize>,
    pub processed_at: Option<DateTime<Utc>>,
}
