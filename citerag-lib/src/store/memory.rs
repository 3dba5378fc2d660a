use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::ChunkMetadata;
use crate::embed::Embedding;
use crate::store::{check_dimensions, EmbeddedChunk, ScoredDocument, VectorIndex};
use crate::{Error, Result};

/// In-memory vector index for development, tests and small corpora.
///
/// Uses brute-force cosine similarity search. Suitable for small datasets
/// (< 10k chunks). Reads and writes go through a lock, so a query issued
/// after an upsert returns sees the upserted chunks.
///
/// With a snapshot path, every upsert also rewrites the snapshot file and
/// only succeeds once it is written.
pub struct MemoryIndex {
    dimension: usize,
    entries: RwLock<HashMap<String, Entry>>,
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    vector: Embedding,
    metadata: ChunkMetadata,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    id: String,
    #[serde(flatten)]
    entry: Entry,
}

impl MemoryIndex {
    /// Create a new empty index for vectors of `dimension` floats.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open an index persisted at `path`, starting empty if the file does
    /// not exist yet.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut index = Self::new(dimension);
        index.snapshot = Some(path.to_path_buf());

        if !path.exists() {
            return Ok(index);
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| Error::IndexQuery(format!("failed to read {}: {e}", path.display())))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| Error::IndexQuery(format!("corrupt snapshot {}: {e}", path.display())))?;

        if snapshot.dimension != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: snapshot.dimension,
            });
        }

        let entries: HashMap<String, Entry> = snapshot
            .entries
            .into_iter()
            .map(|e| (e.id, e.entry))
            .collect();
        if let Some(entry) = entries.values().find(|e| e.vector.len() != dimension) {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: entry.vector.len(),
            });
        }

        info!(path = %path.display(), entries = entries.len(), "loaded index snapshot");
        index.entries = RwLock::new(entries);
        Ok(index)
    }

    /// Get total number of stored chunks
    ///
    /// A poisoned lock is logged and the count read through it; writers
    /// never leave a half-applied batch behind.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => {
                warn!("index lock poisoned, reading entry count anyway");
                poisoned.into_inner().len()
            }
        }
    }

    /// Check if index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all stored data
    ///
    /// With a snapshot, entries are only dropped once the empty snapshot
    /// has been written.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.write()?;
        self.save(&HashMap::new())?;
        entries.clear();
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| Error::IndexQuery("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| Error::IndexWrite("index lock poisoned".to_string()))
    }

    fn save(&self, entries: &HashMap<String, Entry>) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let mut snapshot = Snapshot {
            dimension: self.dimension,
            entries: entries
                .iter()
                .map(|(id, entry)| SnapshotEntry {
                    id: id.clone(),
                    entry: entry.clone(),
                })
                .collect(),
        };
        snapshot.entries.sort_by(|a, b| a.id.cmp(&b.id));

        let json = serde_json::to_string(&snapshot)
            .map_err(|e| Error::IndexWrite(format!("failed to encode snapshot: {e}")))?;

        // write then rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| Error::IndexWrite(format!("failed to write {}: {e}", path.display())))?;

        debug!(path = %path.display(), entries = entries.len(), "saved index snapshot");
        Ok(())
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        check_dimensions(chunks, self.dimension)?;

        let mut entries = self.write()?;
        if self.snapshot.is_some() {
            // stage the update so a failed save leaves the index untouched
            let mut staged = entries.clone();
            insert_all(&mut staged, chunks);
            self.save(&staged)?;
            *entries = staged;
        } else {
            insert_all(&mut entries, chunks);
        }

        debug!(upserted = chunks.len(), total = entries.len(), "memory upsert");
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.read()?;

        // min-heap of the best k seen so far
        let mut best = BinaryHeap::with_capacity(top_k + 1);
        for (id, entry) in entries.iter() {
            best.push(Reverse(Candidate {
                score: cosine_similarity(vector, &entry.vector),
                id,
            }));
            if best.len() > top_k {
                best.pop();
            }
        }

        Ok(best
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| ScoredDocument {
                id: c.id.clone(),
                score: c.score,
                metadata: entries[c.id].metadata.clone(),
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn insert_all(entries: &mut HashMap<String, Entry>, chunks: &[EmbeddedChunk]) {
    for embedded in chunks {
        entries.insert(
            embedded.chunk.id.clone(),
            Entry {
                vector: embedded.embedding.clone(),
                metadata: embedded.chunk.metadata.clone(),
            },
        );
    }
}

/// Heap entry ordered by score, then by id descending so equal scores come
/// out in ascending id order.
struct Candidate<'a> {
    score: f32,
    id: &'a String,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(self.id))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
