//! Document and chunk types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Free-form scalar metadata attached to documents and chunks
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key: source file name
pub const META_SOURCE: &str = "source";
/// Metadata key: 1-based part number within the source file
pub const META_PART: &str = "part";
/// Metadata key: worksheet name (spreadsheets)
pub const META_SHEET: &str = "sheet";
/// Metadata key: character offset of a chunk inside its parent document
pub const META_START_INDEX: &str = "start_index";

/// A unit of extracted text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Extracted text
    pub content: String,
    /// Source file, part, sheet, ...
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document without metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Source file name, if known
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(|v| v.as_str())
    }
}

/// A bounded slice of a document's text, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable chunk ID (derived from source, offset and content)
    pub id: Uuid,
    /// Text content
    pub content: String,
    /// Parent metadata plus `start_index`
    pub metadata: Metadata,
    /// Character offset of this chunk inside its parent document
    pub start_index: usize,
}

impl Chunk {
    /// Create a chunk of `parent` starting at `start_index` characters
    pub fn new(parent: &Document, content: String, start_index: usize) -> Self {
        let mut metadata = parent.metadata.clone();
        metadata.insert(META_START_INDEX.to_string(), serde_json::json!(start_index));

        let mut name = Vec::with_capacity(content.len() + 32);
        name.extend_from_slice(parent.source().unwrap_or_default().as_bytes());
        name.extend_from_slice(&start_index.to_le_bytes());
        name.extend_from_slice(content.as_bytes());

        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, &name),
            content,
            metadata,
            start_index,
        }
    }
}

/// A chunk returned by a vector search with its relevance score
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched chunk
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is more similar)
    pub score: f32,
}
