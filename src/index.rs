//! Exact (brute-force) cosine-similarity index over one document's chunk vectors.
//!
//! # Ranking
//!
//! [`VectorIndex::search`] scores every entry with cosine similarity and sorts
//! by score descending, breaking ties by ascending chunk index, then keeps the
//! first `k`. An approximate index would have to keep exactly this ordering.
//!
//! # On-disk format
//!
//! JSON, written to a temporary file and renamed into place:
//!
//! ```json
//! {
//!   "format": "docqa-vector-index",
//!   "version": 1,
//!   "dims": 1536,
//!   "checksum": "<sha256 of the entry payload>",
//!   "entries": [{ "chunk": 0, "vector": "<base64 little-endian f32>" }]
//! }
//! ```
//!
//! A wrong format tag, version, dimensionality, blob length or checksum makes
//! [`VectorIndex::load`] fail with [`Error::IndexCorrupt`].

use std::collections::HashSet;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

const FORMAT_TAG: &str = "docqa-vector-index";
pub const FORMAT_VERSION: u32 = 1;

/// One search result: a chunk and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    chunk_index: usize,
    vector: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<Entry>,
}

impl VectorIndex {
    /// Build from chunks whose `embedding` has been filled in.
    ///
    /// Fails if any chunk lacks a vector, vectors disagree on dimensionality,
    /// a vector holds a non-finite value, or two chunks share an index.
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        let mut items = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = chunk.embedding.clone().ok_or_else(|| {
                Error::IndexBuild(format!("chunk {} has no embedding", chunk.index))
            })?;
            items.push((chunk.index, vector));
        }
        Self::from_vectors(items)
    }

    /// Build from `(chunk index, vector)` pairs.
    pub fn from_vectors(items: Vec<(usize, Vec<f32>)>) -> Result<Self> {
        let dims = items.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut seen = HashSet::with_capacity(items.len());
        let mut entries = Vec::with_capacity(items.len());

        for (chunk_index, vector) in items {
            if vector.is_empty() {
                return Err(Error::IndexBuild(format!(
                    "chunk {} has an empty vector",
                    chunk_index
                )));
            }
            if vector.len() != dims {
                return Err(Error::IndexBuild(format!(
                    "chunk {} has {} dimensions, expected {}",
                    chunk_index,
                    vector.len(),
                    dims
                )));
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(Error::IndexBuild(format!(
                    "chunk {} has a non-finite component",
                    chunk_index
                )));
            }
            if !seen.insert(chunk_index) {
                return Err(Error::IndexBuild(format!(
                    "chunk {} appears more than once",
                    chunk_index
                )));
            }
            let norm = l2_norm(&vector);
            entries.push(Entry {
                chunk_index,
                vector,
                norm,
            });
        }

        entries.sort_by_key(|e| e.chunk_index);
        Ok(Self { dims, entries })
    }

    /// Vector dimensionality; `0` for an index with no entries.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(Error::InvalidRequest("k must be >= 1".to_string()));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidRequest(
                "query vector has a non-finite component".to_string(),
            ));
        }

        let query_norm = l2_norm(query);
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|e| SearchHit {
                chunk_index: e.chunk_index,
                score: cosine(query, query_norm, &e.vector, e.norm),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to `path`, replacing any previous file atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let file = IndexFile {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            dims: self.dims,
            checksum: self.checksum(),
            entries: self
                .entries
                .iter()
                .map(|e| IndexFileEntry {
                    chunk: e.chunk_index,
                    vector: BASE64.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        };
        let json = serde_json::to_vec(&file)
            .map_err(|e| Error::IndexBuild(format!("cannot serialize index: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read an index written by [`persist`](Self::persist).
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IndexNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| Error::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let file: IndexFile =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("invalid JSON: {}", e)))?;
        if file.format != FORMAT_TAG {
            return Err(corrupt(format!("unexpected format tag '{}'", file.format)));
        }
        if file.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                file.version, FORMAT_VERSION
            )));
        }

        let blob_len = file
            .dims
            .checked_mul(4)
            .ok_or_else(|| corrupt(format!("dimension header {} out of range", file.dims)))?;

        let mut items = Vec::with_capacity(file.entries.len());
        for entry in file.entries {
            let blob = BASE64
                .decode(entry.vector.as_bytes())
                .map_err(|e| corrupt(format!("chunk {}: bad base64: {}", entry.chunk, e)))?;
            if blob.len() != blob_len {
                return Err(corrupt(format!(
                    "chunk {}: {} bytes, expected {}",
                    entry.chunk,
                    blob.len(),
                    blob_len
                )));
            }
            items.push((entry.chunk, blob_to_vec(&blob)));
        }

        let index = Self::from_vectors(items).map_err(|e| corrupt(e.to_string()))?;
        if !index.is_empty() && index.dims != file.dims {
            return Err(corrupt("dimension header disagrees with entries".to_string()));
        }
        if index.checksum() != file.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        Ok(index)
    }

    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.dims as u64).to_le_bytes());
        for e in &self.entries {
            hasher.update((e.chunk_index as u64).to_le_bytes());
            hasher.update(vec_to_blob(&e.vector));
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format: String,
    version: u32,
    dims: usize,
    checksum: String,
    entries: Vec<IndexFileEntry>,
}

#[derive(Serialize, Deserialize)]
struct IndexFileEntry {
    chunk: usize,
    vector: String,
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / denom
}

/// Little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
