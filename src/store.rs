//! Per-document store: the map from filename to its queryable index.
//!
//! Each indexed document lives under its own directory, named by the hex
//! encoding of the filename, and is written as an immutable *generation*:
//!
//! ```text
//! <data_dir>/documents/<hex(filename)>/CURRENT
//! <data_dir>/documents/<hex(filename)>/<generation>/document.json
//! <data_dir>/documents/<hex(filename)>/<generation>/index.json
//! ```
//!
//! A new generation becomes current only when `CURRENT` is replaced by a
//! rename, and only then is the in-memory `Arc<IndexedDocument>` swapped.
//! Readers clone the `Arc` and never see a half-built index. Superseded
//! generations are removed after the swap.
//!
//! Writers (reprocess, delete) must hold the document's [`WriteGuard`].
//! Acquiring it never waits: a second writer gets
//! [`Error::ReprocessingInProgress`].

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Document, DocumentStatus, DocumentSummary};

const CURRENT_FILE: &str = "CURRENT";
const DOCUMENT_FILE: &str = "document.json";
const INDEX_FILE: &str = "index.json";

/// A fully built document together with its vector index.
#[derive(Debug)]
pub struct IndexedDocument {
    pub document: Document,
    pub index: VectorIndex,
}

/// Exclusive right to replace or delete one document.
pub struct WriteGuard {
    filename: String,
    _guard: OwnedMutexGuard<()>,
}

pub struct DocumentStore {
    root: PathBuf,
    current: RwLock<HashMap<String, Arc<IndexedDocument>>>,
    statuses: RwLock<HashMap<String, DocumentStatus>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentStore {
    /// Open (or create) the store under `data_dir` and reload every document
    /// whose current generation loads cleanly. Broken ones are skipped with a
    /// warning.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join("documents");
        std::fs::create_dir_all(&root)?;

        let mut current = HashMap::new();
        let mut statuses = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            match load_current(&dir) {
                Ok(Some(indexed)) => {
                    let filename = indexed.document.filename.clone();
                    tracing::debug!(document = %filename, chunks = indexed.index.len(), "loaded document");
                    statuses.insert(filename.clone(), DocumentStatus::Indexed);
                    current.insert(filename, Arc::new(indexed));
                }
                Ok(None) => {
                    tracing::warn!(dir = %dir.display(), "skipping document directory without a current generation");
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable document");
                }
            }
        }

        tracing::info!(root = %root.display(), documents = current.len(), "document store opened");
        Ok(Self {
            root,
            current: RwLock::new(current),
            statuses: RwLock::new(statuses),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Take the write lock for `filename`, failing immediately if another
    /// writer holds it.
    pub async fn lock_for_write(&self, filename: &str) -> Result<WriteGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // An entry only the map references is unlocked and has no waiter.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock
            .try_lock_owned()
            .map_err(|_| Error::ReprocessingInProgress(filename.to_string()))?;
        Ok(WriteGuard {
            filename: filename.to_string(),
            _guard: guard,
        })
    }

    /// The current generation of `filename`, if it is queryable.
    pub async fn get(&self, filename: &str) -> Option<Arc<IndexedDocument>> {
        self.current.read().await.get(filename).cloned()
    }

    /// The queryable document processed most recently.
    pub async fn most_recent(&self) -> Option<Arc<IndexedDocument>> {
        self.current
            .read()
            .await
            .values()
            .max_by(|a, b| {
                a.document
                    .processed_at
                    .cmp(&b.document.processed_at)
                    .then_with(|| a.document.filename.cmp(&b.document.filename))
            })
            .cloned()
    }

    pub async fn status(&self, filename: &str) -> Option<DocumentStatus> {
        self.statuses.read().await.get(filename).cloned()
    }

    pub async fn set_status(&self, filename: &str, status: DocumentStatus) {
        tracing::debug!(document = filename, status = status.label(), "status change");
        self.statuses
            .write()
            .await
            .insert(filename.to_string(), status);
    }

    /// Persist a new generation and make it current.
    ///
    /// The previous generation stays queryable until the swap.
    pub async fn commit(
        &self,
        guard: &WriteGuard,
        document: Document,
        index: VectorIndex,
    ) -> Result<Arc<IndexedDocument>> {
        if document.filename != guard.filename {
            return Err(Error::InvalidRequest(format!(
                "write lock is for '{}', not '{}'",
                guard.filename, document.filename
            )));
        }
        if index.len() != document.chunks.len() {
            return Err(Error::IndexBuild(format!(
                "index has {} entries for {} chunks",
                index.len(),
                document.chunks.len()
            )));
        }

        let indexed = Arc::new(IndexedDocument { document, index });
        let dir = self.document_dir(&guard.filename);
        let to_write = indexed.clone();
        let generation = tokio::task::spawn_blocking(move || write_generation(&dir, &to_write))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        self.current
            .write()
            .await
            .insert(guard.filename.clone(), indexed.clone());
        tracing::info!(
            document = %guard.filename,
            generation = %generation,
            chunks = indexed.index.len(),
            "index swapped in"
        );

        let dir = self.document_dir(&guard.filename);
        tokio::task::spawn_blocking(move || remove_stale_generations(&dir, &generation))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        Ok(indexed)
    }

    /// Remove `filename` from memory and disk. Returns `false` if nothing was
    /// known about it.
    pub async fn remove(&self, guard: &WriteGuard) -> Result<bool> {
        let filename = guard.filename.as_str();
        let was_current = self.current.write().await.remove(filename).is_some();
        let had_status = self.statuses.write().await.remove(filename).is_some();

        let dir = self.document_dir(filename);
        let on_disk = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        self.locks.lock().await.remove(filename);

        let removed = was_current || had_status || on_disk;
        if removed {
            tracing::info!(document = filename, "document deleted");
        }
        Ok(removed)
    }

    /// Every known document, sorted by filename.
    pub async fn list(&self) -> Vec<DocumentSummary> {
        let current = self.current.read().await;
        let statuses = self.statuses.read().await;

        let names: BTreeSet<&String> = current.keys().chain(statuses.keys()).collect();
        names
            .into_iter()
            .map(|name| {
                let indexed = current.get(name);
                let latest = statuses.get(name).cloned();
                let (status, last_attempt) = match (indexed, latest) {
                    (Some(_), Some(DocumentStatus::Indexed)) | (Some(_), None) => {
                        (DocumentStatus::Indexed, None)
                    }
                    (Some(_), Some(attempt)) => (DocumentStatus::Indexed, Some(attempt)),
                    (None, latest) => (latest.unwrap_or(DocumentStatus::Indexed), None),
                };
                DocumentSummary {
                    filename: name.clone(),
                    status,
                    last_attempt,
                    chunks: indexed.map(|d| d.document.chunks.len()),
                    processed_at: indexed.map(|d| d.document.processed_at),
                }
            })
            .collect()
    }

    fn document_dir(&self, filename: &str) -> PathBuf {
        self.root.join(hex::encode(filename.as_bytes()))
    }
}

/// Write `indexed` as a fresh generation under `dir` and point `CURRENT` at
/// it. Returns the generation id.
fn write_generation(dir: &Path, indexed: &IndexedDocument) -> Result<String> {
    let generation = format!(
        "{}-{}",
        indexed.document.processed_at.format("%Y%m%dT%H%M%S%.3f"),
        uuid::Uuid::new_v4().simple()
    );
    let gen_dir = dir.join(&generation);
    std::fs::create_dir_all(&gen_dir)?;

    let json = serde_json::to_vec_pretty(&indexed.document)
        .map_err(|e| Error::IndexBuild(format!("cannot serialize document: {}", e)))?;
    std::fs::write(gen_dir.join(DOCUMENT_FILE), json)?;
    indexed.index.persist(&gen_dir.join(INDEX_FILE))?;

    let tmp = dir.join(format!("{}.tmp", CURRENT_FILE));
    std::fs::write(&tmp, &generation)?;
    std::fs::rename(&tmp, dir.join(CURRENT_FILE))?;
    Ok(generation)
}

fn remove_stale_generations(dir: &Path, keep: &str) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list generations");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && entry.file_name() != keep {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove stale generation");
            }
        }
    }
}

/// Load the generation `CURRENT` points at. `Ok(None)` if there is none.
fn load_current(dir: &Path) -> Result<Option<IndexedDocument>> {
    let generation = match std::fs::read_to_string(dir.join(CURRENT_FILE)) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let gen_dir = dir.join(&generation);

    let doc_path = gen_dir.join(DOCUMENT_FILE);
    let bytes = match std::fs::read(&doc_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::IndexNotFound(doc_path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let document: Document = serde_json::from_slice(&bytes).map_err(|e| Error::IndexCorrupt {
        path: doc_path.clone(),
        reason: e.to_string(),
    })?;

    let expected_dir = hex::encode(document.filename.as_bytes());
    if dir.file_name().and_then(|n| n.to_str()) != Some(expected_dir.as_str()) {
        return Err(Error::IndexCorrupt {
            path: doc_path,
            reason: format!("filename '{}' does not match its directory", document.filename),
        });
    }

    let index = VectorIndex::load(&gen_dir.join(INDEX_FILE))?;
    let contiguous = document.chunks.iter().enumerate().all(|(i, c)| c.index == i);
    if index.len() != document.chunks.len() || !contiguous {
        return Err(Error::IndexCorrupt {
            path: gen_dir,
            reason: format!(
                "index has {} entries for {} chunks",
                index.len(),
                document.chunks.len()
            ),
        });
    }

    Ok(Some(IndexedDocument { document, index }))
}
