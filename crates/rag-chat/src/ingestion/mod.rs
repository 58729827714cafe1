//! Document ingestion: folder loading, part splitting, extraction, chunking

pub mod chunker;
pub mod extractor;
pub mod loader;
pub mod splitter;
pub mod xlsx;

pub use chunker::TextChunker;
pub use extractor::{DocumentExtractor, LocalExtractor};
pub use loader::{DocumentLoader, SUPPORTED_EXTENSIONS};
pub use splitter::{DocxSizeSplitter, FilePart, XlsxSheetSplitter};
