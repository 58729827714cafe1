//! Physical partitioning of source files before extraction
//!
//! The extraction service caps the payload of a single request, so Word
//! files are cut into parts by serialized size and workbooks into one file
//! per sheet. Both splitters are lazy: a part is written only when the
//! caller asks for the next one, and the caller deletes it after use.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use calamine::Reader;
use docx_rs::{DocumentChild, ParagraphChild, RunChild};

use super::xlsx::{self, SheetData};
use crate::error::{Error, Result};

/// A temporary file holding one part of a source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Location of the part on disk
    pub path: PathBuf,
    /// Name of the source file the part was cut from
    pub source: String,
    /// 1-based part number
    pub index: u32,
    /// Sheet name for workbook parts
    pub sheet: Option<String>,
}

impl FilePart {
    /// Delete the part file, ignoring a file that is already gone
    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove part {}: {}", self.path.display(), e);
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string())
}

/// Non-blank paragraph texts of a .docx, in document order
pub fn read_docx_paragraphs(data: &[u8], filename: &str) -> Result<Vec<String>> {
    let doc = docx_rs::read_docx(data).map_err(|e| Error::file_parse(filename, e.to_string()))?;

    let mut paragraphs = Vec::new();
    for child in &doc.document.children {
        if let DocumentChild::Paragraph(p) = child {
            let mut text = String::new();
            for child in &p.children {
                if let ParagraphChild::Run(run) = child {
                    for child in &run.children {
                        if let RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }
    Ok(paragraphs)
}

/// Serialize paragraphs into a standalone .docx
pub fn docx_to_bytes(paragraphs: &[String]) -> Result<Vec<u8>> {
    let docx = paragraphs.iter().fold(docx_rs::Docx::new(), |docx, text| {
        docx.add_paragraph(docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(text)))
    });

    let mut buf = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buf)
        .map_err(|e| Error::file_parse("part.docx", e.to_string()))?;
    Ok(buf.into_inner())
}

/// Lazily cuts a .docx into parts whose serialized size reaches `max_size_bytes`
pub struct DocxSizeSplitter {
    source: String,
    stem: String,
    out_dir: PathBuf,
    max_size_bytes: u64,
    paragraphs: std::vec::IntoIter<String>,
    current: Vec<String>,
    part_num: u32,
    done: bool,
}

impl DocxSizeSplitter {
    /// Read `file` and prepare to write its parts into `out_dir`
    pub fn new(file: &Path, out_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        let source = file_name(file);
        let is_docx = file
            .extension()
            .map(|e| e.eq_ignore_ascii_case("docx"))
            .unwrap_or(false);
        if !is_docx {
            return Err(Error::file_parse(&source, "expected a .docx file"));
        }

        let data = std::fs::read(file)?;
        let paragraphs = read_docx_paragraphs(&data, &source)?;
        std::fs::create_dir_all(out_dir)?;

        tracing::debug!("[{}] {} paragraphs to split", source, paragraphs.len());

        Ok(Self {
            stem: file_stem(file),
            source,
            out_dir: out_dir.to_path_buf(),
            max_size_bytes,
            paragraphs: paragraphs.into_iter(),
            current: Vec::new(),
            part_num: 1,
            done: false,
        })
    }

    fn flush(&mut self, bytes: Vec<u8>) -> Result<FilePart> {
        let path = self
            .out_dir
            .join(format!("{}_part_{}.docx", self.stem, self.part_num));
        std::fs::write(&path, &bytes)?;

        tracing::info!(
            "Saved {} with {} paragraphs ({} bytes)",
            path.display(),
            self.current.len(),
            bytes.len()
        );

        let part = FilePart {
            path,
            source: self.source.clone(),
            index: self.part_num,
            sheet: None,
        };
        self.current.clear();
        self.part_num += 1;
        Ok(part)
    }
}

impl Iterator for DocxSizeSplitter {
    type Item = Result<FilePart>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while let Some(paragraph) = self.paragraphs.next() {
            self.current.push(paragraph);
            let bytes = match docx_to_bytes(&self.current) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if bytes.len() as u64 >= self.max_size_bytes {
                return Some(self.flush(bytes));
            }
        }

        self.done = true;
        if self.current.is_empty() {
            return None;
        }
        Some(docx_to_bytes(&self.current).and_then(|bytes| self.flush(bytes)))
    }
}

/// Lazily writes one single-sheet workbook per sheet of the source
pub struct XlsxSheetSplitter {
    source: String,
    stem: String,
    out_dir: PathBuf,
    workbook: calamine::Sheets<std::io::BufReader<std::fs::File>>,
    sheet_names: std::vec::IntoIter<String>,
    part_num: u32,
}

impl XlsxSheetSplitter {
    /// Open `file` and prepare to write its sheets into `out_dir`
    pub fn new(file: &Path, out_dir: &Path) -> Result<Self> {
        let source = file_name(file);
        let workbook = calamine::open_workbook_auto(file)
            .map_err(|e| Error::file_parse(&source, e.to_string()))?;
        let sheet_names = workbook.sheet_names().to_vec();
        std::fs::create_dir_all(out_dir)?;

        Ok(Self {
            stem: file_stem(file),
            source,
            out_dir: out_dir.to_path_buf(),
            workbook,
            sheet_names: sheet_names.into_iter(),
            part_num: 1,
        })
    }

    fn write_sheet(&mut self, name: &str) -> Result<FilePart> {
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|e| Error::file_parse(&self.source, e.to_string()))?;
        let sheet = SheetData::from_range(name, &range);

        let safe_name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = self.out_dir.join(format!("{}_{}.xlsx", self.stem, safe_name));
        xlsx::write_workbook(&path, &[sheet])?;

        let part = FilePart {
            path,
            source: self.source.clone(),
            index: self.part_num,
            sheet: Some(name.to_string()),
        };
        self.part_num += 1;
        Ok(part)
    }
}

impl Iterator for XlsxSheetSplitter {
    type Item = Result<FilePart>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.sheet_names.next()?;
        Some(self.write_sheet(&name))
    }
}
