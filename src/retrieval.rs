//! Question → ranked chunks.
//!
//! [`RetrievalEngine`] embeds the question, searches the document's
//! [`VectorIndex`](crate::index::VectorIndex) and drops hits below the
//! optional `min_score` floor. An empty result is reported as
//! [`Retrieval::NoRelevantContent`], not as an error.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::RetrievedChunk;
use crate::store::{DocumentStore, IndexedDocument};

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Best first; never empty.
    Ranked(Vec<RetrievedChunk>),
    NoRelevantContent,
}

impl Retrieval {
    pub fn chunks(&self) -> &[RetrievedChunk] {
        match self {
            Retrieval::Ranked(chunks) => chunks,
            Retrieval::NoRelevantContent => &[],
        }
    }

    pub fn into_chunks(self) -> Vec<RetrievedChunk> {
        match self {
            Retrieval::Ranked(chunks) => chunks,
            Retrieval::NoRelevantContent => Vec::new(),
        }
    }
}

pub struct RetrievalEngine {
    embedder: Arc<Embedder>,
    store: Arc<DocumentStore>,
    min_score: Option<f32>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<Embedder>, store: Arc<DocumentStore>, min_score: Option<f32>) -> Self {
        Self {
            embedder,
            store,
            min_score,
        }
    }

    /// Retrieve from the current index of `filename`.
    pub async fn retrieve(&self, question: &str, filename: &str, k: usize) -> Result<Retrieval> {
        let doc = self
            .store
            .get(filename)
            .await
            .ok_or_else(|| Error::IndexNotFound(filename.to_string()))?;
        self.retrieve_in(&doc, question, k).await
    }

    /// Retrieve from a document the caller already holds.
    pub async fn retrieve_in(
        &self,
        doc: &IndexedDocument,
        question: &str,
        k: usize,
    ) -> Result<Retrieval> {
        if question.trim().is_empty() {
            return Err(Error::InvalidRequest("question must not be empty".to_string()));
        }
        if k == 0 {
            return Err(Error::InvalidRequest("k must be >= 1".to_string()));
        }

        let query = self
            .embedder
            .embed_query(question)
            .await
            .map_err(Error::Embedding)?;
        let hits = doc.index.search(&query, k)?;
        let total = hits.len();

        let mut ranked = Vec::with_capacity(total);
        for hit in hits {
            if self.min_score.is_some_and(|floor| hit.score < floor) {
                continue;
            }
            let chunk = doc.document.chunk(hit.chunk_index).ok_or_else(|| {
                Error::IndexBuild(format!(
                    "index of '{}' refers to missing chunk {}",
                    doc.document.filename, hit.chunk_index
                ))
            })?;
            ranked.push(RetrievedChunk {
                chunk_index: chunk.index,
                score: hit.score,
                start: chunk.start,
                end: chunk.end,
                text: chunk.text.clone(),
            });
        }

        tracing::debug!(
            document = %doc.document.filename,
            hits = total,
            kept = ranked.len(),
            min_score = ?self.min_score,
            "retrieval"
        );

        if ranked.is_empty() {
            Ok(Retrieval::NoRelevantContent)
        } else {
            Ok(Retrieval::Ranked(ranked))
        }
    }
}
