//! Folder loader: validation, splitting, extraction and the documents cache

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use walkdir::WalkDir;

use super::extractor::DocumentExtractor;
use super::splitter::{DocxSizeSplitter, FilePart, XlsxSheetSplitter};
use crate::config::DocumentsConfig;
use crate::error::{Error, Result};
use crate::types::Document;

/// Extensions the loader can ingest
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".docx", ".xlsx"];

fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Loads a folder of Word and Excel documents into extracted documents
pub struct DocumentLoader {
    extractor: Arc<dyn DocumentExtractor>,
    temp_dir: Option<PathBuf>,
    max_part_bytes: u64,
    extract_retries: u32,
    retry_backoff: Duration,
    ignored: Vec<OsString>,
}

impl DocumentLoader {
    /// Create a loader with default limits (3MB parts, 2 retries)
    pub fn new(extractor: Arc<dyn DocumentExtractor>) -> Self {
        let defaults = DocumentsConfig::default();
        Self {
            extractor,
            temp_dir: None,
            max_part_bytes: defaults.max_part_bytes,
            extract_retries: defaults.extract_retries,
            retry_backoff: Duration::from_secs(1),
            ignored: Vec::new(),
        }
    }

    /// Create a loader from the documents configuration
    ///
    /// The documents cache file is ignored when scanning the folder.
    pub fn from_config(extractor: Arc<dyn DocumentExtractor>, config: &DocumentsConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            max_part_bytes: config.max_part_bytes,
            extract_retries: config.extract_retries,
            ignored: vec![OsString::from(&config.cache_file)],
            ..Self::new(extractor)
        }
    }

    /// Override the per-part retry policy
    pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.extract_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Override the part size ceiling
    pub fn with_max_part_bytes(mut self, max_part_bytes: u64) -> Self {
        self.max_part_bytes = max_part_bytes;
        self
    }

    /// Files directly inside `folder`, sorted by name
    fn folder_files(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_file() && !self.ignored.iter().any(|n| n == entry.file_name()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Fail with `UnsupportedFiles` if any file in `folder` is not .docx / .xlsx
    pub fn check_supported_files(&self, folder: &Path) -> Result<()> {
        let unsupported: Vec<String> = self
            .folder_files(folder)?
            .iter()
            .filter(|path| !SUPPORTED_EXTENSIONS.contains(&dotted_extension(path).as_str()))
            .map(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            })
            .collect();

        if !unsupported.is_empty() {
            return Err(Error::UnsupportedFiles {
                files: unsupported,
                supported: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            });
        }
        Ok(())
    }

    /// Extract every document of `folder`
    ///
    /// Unsupported files abort before any extraction. After that the load
    /// is best-effort: a part that cannot be extracted is logged and skipped.
    pub async fn load_folder(&self, folder: &Path) -> Result<Vec<Document>> {
        self.check_supported_files(folder)?;

        let work_dir = match &self.temp_dir {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                tempfile::Builder::new().prefix("rag-parts-").tempdir_in(base)?
            }
            None => tempfile::Builder::new().prefix("rag-parts-").tempdir()?,
        };

        let mut documents = Vec::new();
        for file in self.folder_files(folder)? {
            let parsed = match dotted_extension(&file).as_str() {
                ".docx" => {
                    match DocxSizeSplitter::new(&file, work_dir.path(), self.max_part_bytes) {
                        Ok(splitter) => self.extract_parts(splitter).await,
                        Err(e) => {
                            tracing::error!("Can not split document {}: {}", file.display(), e);
                            continue;
                        }
                    }
                }
                ".xlsx" => match XlsxSheetSplitter::new(&file, work_dir.path()) {
                    Ok(splitter) => self.extract_parts(splitter).await,
                    Err(e) => {
                        tracing::error!("Can not open workbook {}: {}", file.display(), e);
                        continue;
                    }
                },
                _ => {
                    tracing::warn!("Unknown file format: {}", file.display());
                    continue;
                }
            };
            tracing::info!("Loaded {} documents from {}", parsed.len(), file.display());
            documents.extend(parsed);
        }

        // work_dir is removed on drop
        Ok(documents)
    }

    /// Drive a lazy splitter, extracting and deleting each part in turn
    async fn extract_parts<I>(&self, splitter: I) -> Vec<Document>
    where
        I: Iterator<Item = Result<FilePart>> + Send + 'static,
    {
        let mut documents = Vec::new();
        let mut splitter = Some(splitter);

        while let Some(iter) = splitter.take() {
            let (iter, next) = match tokio::task::spawn_blocking(move || {
                let mut iter = iter;
                let next = iter.next();
                (iter, next)
            })
            .await
            {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!("Splitter task failed: {}", e);
                    break;
                }
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    tracing::error!("Can not split part: {}", e);
                    break;
                }
                Some(Ok(part)) => {
                    match self.extract_with_retry(&part).await {
                        Ok(docs) => documents.extend(docs),
                        Err(e) => tracing::error!(
                            "Can not load part {} of {}: {}",
                            part.index,
                            part.source,
                            e
                        ),
                    }
                    part.remove();
                    splitter = Some(iter);
                }
            }
        }

        documents
    }

    async fn extract_with_retry(&self, part: &FilePart) -> Result<Vec<Document>> {
        let mut attempt = 0u32;
        loop {
            match self.extractor.extract(part).await {
                Ok(docs) => return Ok(docs),
                Err(e) if attempt < self.extract_retries => {
                    let delay = self.retry_backoff * 2u32.pow(attempt);
                    tracing::warn!(
                        "Extraction of {} failed (attempt {}/{}), retrying in {:?}: {}",
                        part.path.display(),
                        attempt + 1,
                        self.extract_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write documents to the JSON cache file
    pub fn persist(documents: &[Document], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(documents)?;
        std::fs::write(path, json)?;
        tracing::info!("Documents saved in {}", path.display());
        Ok(())
    }

    /// Read documents back from the JSON cache file
    pub fn restore(path: &Path) -> Result<Vec<Document>> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::extractor::MockDocumentExtractor;
    use crate::ingestion::splitter::docx_to_bytes;
    use crate::ingestion::xlsx::{self, CellValue, SheetData};
    use crate::types::document::META_SOURCE;

    fn write_docx(dir: &Path, name: &str, paragraphs: &[&str]) {
        let paragraphs: Vec<String> = paragraphs.iter().map(|p| p.to_string()).collect();
        std::fs::write(dir.join(name), docx_to_bytes(&paragraphs).unwrap()).unwrap();
    }

    fn write_xlsx(dir: &Path, name: &str, sheet_names: &[&str]) {
        let sheets: Vec<SheetData> = sheet_names
            .iter()
            .map(|n| SheetData {
                name: n.to_string(),
                origin: (0, 0),
                rows: vec![vec![CellValue::Text(format!("value of {}", n))]],
            })
            .collect();
        xlsx::write_workbook(&dir.join(name), &sheets).unwrap();
    }

    #[test]
    fn test_check_supported_files_names_offenders() {
        let dir = tempfile::tempdir().unwrap();
        write_docx(dir.path(), "manual.docx", &["text"]);
        std::fs::write(dir.path().join("notes.txt"), "plain").unwrap();

        let loader = DocumentLoader::new(Arc::new(MockDocumentExtractor::new()));
        match loader.check_supported_files(dir.path()) {
            Err(Error::UnsupportedFiles { files, supported }) => {
                assert_eq!(files, vec!["notes.txt".to_string()]);
                assert_eq!(supported, vec![".docx".to_string(), ".xlsx".to_string()]);
            }
            other => panic!("expected UnsupportedFiles, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_folder_is_never_extracted() {
        let dir = tempfile::tempdir().unwrap();
        write_docx(dir.path(), "manual.docx", &["text"]);
        std::fs::write(dir.path().join("notes.txt"), "plain").unwrap();

        let mut extractor = MockDocumentExtractor::new();
        extractor.expect_extract().never();

        let loader = DocumentLoader::new(Arc::new(extractor));
        let result = loader.load_folder(dir.path()).await;
        assert!(matches!(result, Err(Error::UnsupportedFiles { .. })));
    }

    #[tokio::test]
    async fn test_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_docx(dir.path(), "manual.docx", &["text"]);
        std::fs::write(dir.path().join("saved_docs.json"), "[]").unwrap();
        std::fs::create_dir(dir.path().join("vector_index")).unwrap();

        let loader = DocumentLoader::from_config(
            Arc::new(MockDocumentExtractor::new()),
            &DocumentsConfig::default(),
        );
        assert!(loader.check_supported_files(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_failed_part_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_xlsx(dir.path(), "book.xlsx", &["broken", "fine"]);
        write_docx(dir.path(), "guide.docx", &["hello"]);

        let mut extractor = MockDocumentExtractor::new();
        extractor.expect_extract().times(3).returning(|part: &FilePart| {
            if part.sheet.as_deref() == Some("broken") {
                Err(Error::extraction("service rejected part"))
            } else {
                Ok(vec![Document::new(format!("{}#{}", part.source, part.index))
                    .with_metadata(META_SOURCE, part.source.clone())])
            }
        });

        let loader = DocumentLoader::new(Arc::new(extractor)).with_retry(0, Duration::ZERO);
        let docs = loader.load_folder(dir.path()).await.unwrap();

        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["book.xlsx#2", "guide.docx#1"]);
    }

    #[tokio::test]
    async fn test_large_docx_is_extracted_part_by_part() {
        let dir = tempfile::tempdir().unwrap();
        write_docx(dir.path(), "guide.docx", &["первый", "второй", "третий"]);

        // every serialised paragraph exceeds one byte, so each becomes a part
        let loader = DocumentLoader::new(Arc::new(crate::ingestion::LocalExtractor::new()))
            .with_max_part_bytes(1);
        let docs = loader.load_folder(dir.path()).await.unwrap();

        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["первый", "второй", "третий"]);
        assert!(docs.iter().all(|d| d.source() == Some("guide.docx")));
    }

    #[tokio::test]
    async fn test_part_extraction_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        write_docx(dir.path(), "guide.docx", &["hello"]);

        let mut seq = mockall::Sequence::new();
        let mut extractor = MockDocumentExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::extraction("busy")));
        extractor
            .expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![Document::new("hello")]));

        let loader = DocumentLoader::new(Arc::new(extractor)).with_retry(1, Duration::ZERO);
        let docs = loader.load_folder(dir.path()).await.unwrap();
        assert_eq!(docs, vec![Document::new("hello")]);
    }

    #[tokio::test]
    async fn test_parts_are_deleted_after_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        write_xlsx(dir.path(), "book.xlsx", &["a", "b"]);

        let mut extractor = MockDocumentExtractor::new();
        extractor.expect_extract().times(2).returning(|part: &FilePart| {
            assert!(part.path.exists());
            Ok(Vec::new())
        });

        let mut config = DocumentsConfig::default();
        config.temp_dir = Some(temp.path().to_path_buf());
        let loader = DocumentLoader::from_config(Arc::new(extractor), &config);
        loader.load_folder(dir.path()).await.unwrap();

        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_persist_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("saved_docs.json");
        let docs = vec![
            Document::new("Привет, мир").with_metadata(META_SOURCE, "a.docx"),
            Document::new("second")
                .with_metadata("part", 2)
                .with_metadata("ratio", 0.5)
                .with_metadata("flag", true),
        ];

        DocumentLoader::persist(&docs, &path).unwrap();
        let restored = DocumentLoader::restore(&path).unwrap();
        assert_eq!(restored, docs);
    }

    #[test]
    fn test_restore_missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(DocumentLoader::restore(&path), Err(Error::NotFound(p)) if p == path));
    }
}
