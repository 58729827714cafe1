//! Configuration for the RAG chat service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::retrieval::HnswParams;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Source documents and on-disk caches
    pub documents: DocumentsConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Retrieval policy
    pub retrieval: RetrievalConfig,
    /// Chat model configuration
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Orchestration stages
    pub pipeline: PipelineConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Override selected values from the environment
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key.clone());
            if self.embeddings.api_key.is_none() {
                self.embeddings.api_key = Some(key);
            }
        }
        if let Ok(host) = std::env::var("RAG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("RAG_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("RAG_DOCS_PATH") {
            self.documents.docs_path = PathBuf::from(path);
        }
    }

    /// Check cross-field constraints and prepare the documents directory
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(Error::Config("retrieval.mmr_lambda must be within 0.0..=1.0".to_string()));
        }
        if self.retrieval.hnsw_m < 2 {
            return Err(Error::Config("retrieval.hnsw_m must be at least 2".to_string()));
        }
        self.documents.ensure_docs_dir()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// How long a request waits for the index before failing with "not ready"
    pub index_wait_secs: u64,
    /// First frame sent on a new WebSocket session
    pub greeting: String,
    /// Frame sent in reply to the close command
    pub farewell: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            enable_cors: true,
            index_wait_secs: 60,
            greeting: "Добрый день! Задайте свой вопрос.".to_string(),
            farewell: "Рад был помочь!".to_string(),
        }
    }
}

/// Source documents folder and the caches derived from it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Folder holding the .docx / .xlsx sources; caches live next to them
    pub docs_path: PathBuf,
    /// Extracted documents cache file name (inside `docs_path`)
    pub cache_file: String,
    /// Vector index snapshot directory name (inside `docs_path`)
    pub index_dir: String,
    /// Where temporary file parts are written (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
    /// Payload ceiling for a single extraction request
    pub max_part_bytes: u64,
    /// Retries per file part before it is skipped
    pub extract_retries: u32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            docs_path: PathBuf::from("data/docs"),
            cache_file: "saved_docs.json".to_string(),
            index_dir: "vector_index".to_string(),
            temp_dir: None,
            max_part_bytes: 3 * 1024 * 1024, // 3MB
            extract_retries: 2,
        }
    }
}

impl DocumentsConfig {
    /// Path of the extracted documents cache
    pub fn cache_path(&self) -> PathBuf {
        self.docs_path.join(&self.cache_file)
    }

    /// Path of the vector index snapshot
    pub fn index_path(&self) -> PathBuf {
        self.docs_path.join(&self.index_dir)
    }

    fn ensure_docs_dir(&self) -> Result<()> {
        if !self.docs_path.exists() {
            std::fs::create_dir_all(&self.docs_path)?;
        }
        if !self.docs_path.is_dir() {
            return Err(Error::Config(format!(
                "Path {} not a directory.",
                self.docs_path.display()
            )));
        }
        Ok(())
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Retrieval policy: HNSW candidates re-ranked by maximal marginal relevance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks handed to the answer prompt
    pub top_k: usize,
    /// Candidates considered before MMR re-ranking
    pub fetch_k: usize,
    /// 1.0 = pure relevance, 0.0 = pure diversity
    pub mmr_lambda: f32,
    /// HNSW M parameter (connections per layer)
    pub hnsw_m: usize,
    /// HNSW ef_construction parameter
    pub hnsw_ef_construction: usize,
    /// HNSW ef_search parameter
    pub hnsw_ef_search: usize,
}

/// Number of chunks retrieved per question
pub const DEFAULT_TOP_K: usize = 10;

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            fetch_k: 2 * DEFAULT_TOP_K,
            mmr_lambda: 0.5,
            hnsw_m: 32,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
        }
    }
}

impl RetrievalConfig {
    /// Graph parameters for building an index
    pub fn hnsw(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
        }
    }
}

/// Backend provider selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    /// Local Ollama server
    #[default]
    Ollama,
    /// Any OpenAI-compatible endpoint
    OpenAi,
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Which API the chat model speaks
    pub backend: BackendProvider,
    /// Base URL of the API
    pub base_url: String,
    /// API key (OpenAI-compatible backends)
    pub api_key: Option<String>,
    /// Generation model name
    pub model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "gemma2".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which API the embedding model speaks
    pub backend: BackendProvider,
    /// Base URL of the API
    pub base_url: String,
    /// API key (OpenAI-compatible backends)
    pub api_key: Option<String>,
    /// Embedding model name
    pub model: String,
    /// Texts per embedding batch while building the index
    pub batch_size: usize,
    /// Batches embedded concurrently (CPU count when unset)
    pub parallel_batches: Option<usize>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: BackendProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "nomic-embed-text".to_string(),
            batch_size: 32,
            parallel_batches: None,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Orchestration stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the complexity classifier before retrieval
    pub classify: bool,
    /// Grade whole answers against the retrieved context
    pub grounding_check: bool,
    /// Deadline for every chat / embedding / search call
    pub call_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classify: true,
            grounding_check: false,
            call_timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [llm]
            backend = "openai"
            model = "google/gemma-2-9b-it"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.backend, BackendProvider::OpenAi);
        assert_eq!(config.retrieval.top_k, DEFAULT_TOP_K);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RagConfig::default();
        config.documents.docs_path = dir.path().to_path_buf();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_creates_docs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RagConfig::default();
        config.documents.docs_path = dir.path().join("nested").join("docs");
        config.validate().unwrap();
        assert!(config.documents.docs_path.is_dir());
    }

    #[test]
    fn test_validate_rejects_file_as_docs_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let mut config = RagConfig::default();
        config.documents.docs_path = file;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
