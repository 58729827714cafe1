//! Vector store construction with a two-level on-disk cache
//!
//! Level one is the documents cache (`saved_docs.json`): when present the
//! folder is not extracted again. Level two is the index snapshot: it is
//! reused only when the documents were restored from cache and the snapshot
//! matches the configured embedding model and the cached documents.

use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use super::index::{HnswIndex, VectorIndex};
use crate::config::{ChunkingConfig, DocumentsConfig, EmbeddingConfig, RagConfig, RetrievalConfig};
use crate::error::{Error, Result};
use crate::ingestion::{DocumentExtractor, DocumentLoader, TextChunker};
use crate::providers::EmbeddingProvider;
use crate::types::{Chunk, Document, ScoredChunk};

/// Query-side view of the index: embeds questions and runs MMR search
pub struct VectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retrieval: RetrievalConfig,
}

impl VectorStore {
    /// Wrap an index and the embedder its vectors came from
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            retrieval,
        }
    }

    /// Embed a query text
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    /// MMR search for `k` chunks among the configured `fetch_k` candidates
    pub async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let fetch_k = self.retrieval.fetch_k.max(k);
        self.index
            .max_marginal_relevance_search(vector, k, fetch_k, self.retrieval.mmr_lambda)
            .await
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the index holds no chunks
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Builds the vector store at startup
pub struct VectorStoreBuilder {
    loader: DocumentLoader,
    embedder: Arc<dyn EmbeddingProvider>,
    documents: DocumentsConfig,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    embeddings: EmbeddingConfig,
}

impl VectorStoreBuilder {
    /// Create a builder from configuration and providers
    pub fn new(
        config: &RagConfig,
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            loader: DocumentLoader::from_config(extractor, &config.documents),
            embedder,
            documents: config.documents.clone(),
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            embeddings: config.embeddings.clone(),
        }
    }

    /// Load or build the index
    pub async fn build(&self) -> Result<VectorStore> {
        let (documents, rewrite) = self.load_documents().await?;
        let digest = file_digest(&self.documents.cache_path())?;

        let chunker = TextChunker::new(self.chunking.chunk_size, self.chunking.chunk_overlap)?;
        let chunks = chunker.split_documents(&documents);

        let index_path = self.documents.index_path();
        let snapshot = if rewrite {
            None
        } else {
            self.load_snapshot(&index_path, &digest)
        };

        let index = match snapshot {
            Some(index) => index,
            None => {
                let index = self.embed_chunks(chunks).await?;
                if let Err(e) = index.save(&index_path, &self.embedder.model(), Some(digest)) {
                    tracing::warn!("Could not save index snapshot: {}", e);
                }
                index
            }
        };

        tracing::info!("Vector store ready with {} chunks", index.len());
        Ok(VectorStore::new(
            Arc::clone(&self.embedder),
            Arc::new(index),
            self.retrieval.clone(),
        ))
    }

    /// Documents from the cache file, or freshly extracted (`rewrite = true`)
    async fn load_documents(&self) -> Result<(Vec<Document>, bool)> {
        let cache_path = self.documents.cache_path();
        if cache_path.exists() {
            let documents = DocumentLoader::restore(&cache_path)?;
            tracing::info!(
                "Restored {} documents from {}",
                documents.len(),
                cache_path.display()
            );
            return Ok((documents, false));
        }

        let documents = self.loader.load_folder(&self.documents.docs_path).await?;
        DocumentLoader::persist(&documents, &cache_path)?;
        Ok((documents, true))
    }

    /// A compatible snapshot, if one exists
    fn load_snapshot(&self, dir: &Path, digest: &str) -> Option<HnswIndex> {
        let manifest = match HnswIndex::read_manifest(dir) {
            Ok(manifest) => manifest,
            Err(Error::NotFound(_)) => return None,
            Err(e) => {
                tracing::warn!("Unreadable index manifest, rebuilding: {}", e);
                return None;
            }
        };

        let model = self.embedder.model();
        if manifest.model != model {
            tracing::warn!(
                "Index was built with '{}', configured model is '{}'; rebuilding",
                manifest.model,
                model
            );
            return None;
        }
        if manifest.docs_digest.as_deref().is_some_and(|d| d != digest) {
            tracing::warn!("Documents cache changed since the index was built; rebuilding");
            return None;
        }

        match HnswIndex::load(dir, self.retrieval.hnsw()) {
            Ok((index, _)) => Some(index),
            Err(e) => {
                tracing::warn!("Could not load index snapshot, rebuilding: {}", e);
                None
            }
        }
    }

    /// Embed chunks in concurrent batches, keeping chunk order
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<HnswIndex> {
        let batch_size = self.embeddings.batch_size.max(1);
        let concurrency = self
            .embeddings
            .parallel_batches
            .unwrap_or_else(num_cpus::get)
            .max(1);

        tracing::info!(
            "Embedding {} chunks in batches of {} ({} concurrent)",
            chunks.len(),
            batch_size,
            concurrency
        );

        let batches: Vec<Vec<String>> = chunks
            .chunks(batch_size)
            .map(|batch| batch.iter().map(|c| c.content.clone()).collect())
            .collect();

        let embedder = Arc::clone(&self.embedder);
        let vectors: Vec<Vec<Vec<f32>>> = futures::stream::iter(batches)
            .map(move |texts| embed_batch_checked(Arc::clone(&embedder), texts))
            .buffered(concurrency)
            .try_collect()
            .await?;

        HnswIndex::build(
            chunks.into_iter().zip(vectors.into_iter().flatten()).collect(),
            self.retrieval.hnsw(),
        )
    }
}

/// Embed one batch, checking the provider returned one vector per text
async fn embed_batch_checked(
    embedder: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed_batch(&texts).await?;
    if vectors.len() != texts.len() {
        return Err(Error::embedding(format!(
            "Expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Hex SHA-256 of a file's bytes
fn file_digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
