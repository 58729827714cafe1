//! Retrieval: MMR, the vector index and the store builder

pub mod index;
pub mod mmr;
pub mod store;

pub use index::{HnswIndex, HnswParams, IndexManifest, VectorIndex};
pub use store::{VectorStore, VectorStoreBuilder};
