//! Vector index: HNSW graph over embedded chunks with an on-disk snapshot

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::mmr::{cosine_similarity, mmr_select};
use crate::error::{Error, Result};
use crate::types::{Chunk, ScoredChunk};

const INDEX_FILE: &str = "index.json";
const MANIFEST_FILE: &str = "manifest.json";
/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

/// Read-only similarity search over embedded chunks
///
/// Implementations:
/// - `HnswIndex`: in-memory HNSW graph with cosine distance
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The `k` chunks most similar to `query`, best first
    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// `k` chunks picked by MMR among the `fetch_k` most similar
    async fn max_marginal_relevance_search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<ScoredChunk>>;

    /// Number of indexed chunks
    fn len(&self) -> usize;

    /// Whether the index holds no chunks
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HNSW graph parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Connections per node and layer
    pub m: usize,
    /// Candidate list size while inserting
    pub ef_construction: usize,
    /// Candidate list size while searching
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

/// Describes a saved index snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Embedding model the vectors came from
    pub model: String,
    /// Vector dimensions
    pub dimensions: usize,
    /// Number of chunks
    pub count: usize,
    /// Snapshot creation time
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the documents cache the chunks were cut from
    #[serde(default)]
    pub docs_digest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Approximate nearest-neighbour index over chunk embeddings
///
/// Entry `i` is inserted into the graph with data id `i`. The entries are
/// what a snapshot stores; the graph is rebuilt from them on load.
pub struct HnswIndex {
    entries: Vec<IndexEntry>,
    graph: Option<Hnsw<'static, f32, DistCosine>>,
    dimensions: usize,
    params: HnswParams,
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            graph: None,
            dimensions: 0,
            params: HnswParams::default(),
        }
    }
}

impl HnswIndex {
    /// Build from embedded chunks; all vectors must share one dimension
    pub fn build(embedded: Vec<(Chunk, Vec<f32>)>, params: HnswParams) -> Result<Self> {
        let dimensions = embedded.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((chunk, vector)) = embedded.iter().find(|(_, v)| v.len() != dimensions) {
            return Err(Error::vector_index(format!(
                "Dimension mismatch for chunk {}: expected {}, got {}",
                chunk.id,
                dimensions,
                vector.len()
            )));
        }
        if dimensions == 0 && !embedded.is_empty() {
            return Err(Error::vector_index("Empty embedding vectors"));
        }

        let entries: Vec<IndexEntry> = embedded
            .into_iter()
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        let graph = if entries.is_empty() {
            None
        } else {
            let mut graph = Hnsw::<f32, DistCosine>::new(
                params.m,
                entries.len(),
                MAX_LAYERS,
                params.ef_construction,
                DistCosine {},
            );
            for (id, entry) in entries.iter().enumerate() {
                graph.insert((&entry.vector, id));
            }
            graph.set_searching_mode(true);
            Some(graph)
        };

        tracing::debug!(
            "Built HNSW index with {} chunks ({} dimensions)",
            entries.len(),
            dimensions
        );
        Ok(Self {
            entries,
            graph,
            dimensions,
            params,
        })
    }

    /// Write `index.json` and `manifest.json` into `dir`
    pub fn save(&self, dir: &Path, model: &str, docs_digest: Option<String>) -> Result<IndexManifest> {
        std::fs::create_dir_all(dir)?;

        let file = std::fs::File::create(dir.join(INDEX_FILE))?;
        serde_json::to_writer(BufWriter::new(file), &self.entries)?;

        // Written last: a snapshot without a manifest is never loaded
        let manifest = IndexManifest {
            model: model.to_string(),
            dimensions: self.dimensions,
            count: self.entries.len(),
            created_at: Utc::now(),
            docs_digest,
        };
        std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;

        tracing::info!(
            "Saved index with {} chunks to {}",
            manifest.count,
            dir.display()
        );
        Ok(manifest)
    }

    /// Read only the manifest of a snapshot
    pub fn read_manifest(dir: &Path) -> Result<IndexManifest> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(Error::NotFound(dir.to_path_buf()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Load a snapshot written by `save` and rebuild its graph
    pub fn load(dir: &Path, params: HnswParams) -> Result<(Self, IndexManifest)> {
        let manifest = Self::read_manifest(dir)?;
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Err(Error::NotFound(dir.to_path_buf()));
        }

        let file = std::fs::File::open(index_path)?;
        let entries: Vec<IndexEntry> = serde_json::from_reader(BufReader::new(file))?;
        if entries.len() != manifest.count {
            return Err(Error::vector_index(format!(
                "Snapshot holds {} chunks, manifest says {}",
                entries.len(),
                manifest.count
            )));
        }

        let index = Self::build(
            entries
                .into_iter()
                .map(|entry| (entry.chunk, entry.vector))
                .collect(),
            params,
        )?;
        if index.dimensions != manifest.dimensions && !index.entries.is_empty() {
            return Err(Error::vector_index(format!(
                "Snapshot vectors have {} dimensions, manifest says {}",
                index.dimensions, manifest.dimensions
            )));
        }
        tracing::info!("Loaded index with {} chunks from {}", index.len(), dir.display());
        Ok((index, manifest))
    }

    /// Entry indices and cosine similarities of the `n` nearest vectors, best first
    fn ranked(&self, query: &[f32], n: usize) -> Result<Vec<(usize, f32)>> {
        let graph = match &self.graph {
            Some(graph) if n > 0 => graph,
            _ => return Ok(Vec::new()),
        };
        if query.len() != self.dimensions {
            return Err(Error::vector_index(format!(
                "Query has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }

        let ef = self.params.ef_search.max(n);
        let mut scored: Vec<(usize, f32)> = graph
            .search(query, n, ef)
            .into_iter()
            .filter(|neighbour| neighbour.d_id < self.entries.len())
            .map(|neighbour| {
                let idx = neighbour.d_id;
                (idx, cosine_similarity(query, &self.entries[idx].vector))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(n);
        Ok(scored)
    }

    fn scored_chunk(&self, idx: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: self.entries[idx].chunk.clone(),
            score,
        }
    }
}

#[async_trait]
impl VectorIndex for HnswIndex {
    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        Ok(self
            .ranked(query, k)?
            .into_iter()
            .map(|(idx, score)| self.scored_chunk(idx, score))
            .collect())
    }

    async fn max_marginal_relevance_search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let candidates = self.ranked(query, fetch_k.max(k))?;
        let vectors: Vec<&[f32]> = candidates
            .iter()
            .map(|(idx, _)| self.entries[*idx].vector.as_slice())
            .collect();

        Ok(mmr_select(query, &vectors, k, lambda)
            .into_iter()
            .map(|pos| {
                let (idx, score) = candidates[pos];
                self.scored_chunk(idx, score)
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
