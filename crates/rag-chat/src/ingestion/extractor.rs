//! Document text extraction capability

use async_trait::async_trait;

use super::splitter::{read_docx_paragraphs, FilePart};
use super::xlsx;
use crate::error::{Error, Result};
use crate::types::document::{Document, META_PART, META_SHEET, META_SOURCE};

/// Turns one file part into extracted documents
///
/// Implementations:
/// - `LocalExtractor`: docx-rs / calamine, no network
///
/// Remote document-intelligence services plug in here as well.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract the text of `part`
    async fn extract(&self, part: &FilePart) -> Result<Vec<Document>>;
}

/// Extracts text locally from .docx and .xlsx parts
#[derive(Debug, Clone, Default)]
pub struct LocalExtractor;

impl LocalExtractor {
    /// Create a new local extractor
    pub fn new() -> Self {
        Self
    }

    fn extract_blocking(part: &FilePart) -> Result<Vec<Document>> {
        let ext = part
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let content = match ext.as_str() {
            "docx" => {
                let data = std::fs::read(&part.path)?;
                read_docx_paragraphs(&data, &part.source)?.join("\n")
            }
            "xlsx" => {
                let mut content = String::new();
                for sheet in xlsx::read_workbook(&part.path)? {
                    for row in &sheet.rows {
                        let cells: Vec<String> = row.iter().map(|c| c.as_text()).collect();
                        if cells.iter().all(|c| c.is_empty()) {
                            continue;
                        }
                        content.push_str(&cells.join(" | "));
                        content.push('\n');
                    }
                }
                content
            }
            other => {
                return Err(Error::extraction(format!(
                    "cannot extract '{}' parts ({})",
                    other,
                    part.path.display()
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut doc = Document::new(content)
            .with_metadata(META_SOURCE, part.source.clone())
            .with_metadata(META_PART, part.index);
        if let Some(sheet) = &part.sheet {
            doc = doc.with_metadata(META_SHEET, sheet.clone());
        }
        Ok(vec![doc])
    }
}

#[async_trait]
impl DocumentExtractor for LocalExtractor {
    async fn extract(&self, part: &FilePart) -> Result<Vec<Document>> {
        let part = part.clone();
        tokio::task::spawn_blocking(move || Self::extract_blocking(&part))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }
}
