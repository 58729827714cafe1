//! Recursive character text splitting
//!
//! Text is cut on the coarsest separator that occurs in it (blank lines,
//! then newlines, then spaces, then single graphemes), and the pieces are
//! merged back into windows of at most `chunk_size` characters, carrying up
//! to `chunk_overlap` characters from one window into the next. Lengths and
//! offsets are counted in `char`s.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Splits documents into overlapping chunks
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Create a chunker; the overlap must be smaller than the chunk size
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Split `text` into chunk strings
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    /// Split `text` and locate each chunk, as (char offset, content)
    pub fn split_with_offsets(&self, text: &str) -> Vec<(usize, String)> {
        let mut located = Vec::new();
        let mut index = 0usize;
        let mut previous_len = 0usize;

        for chunk in self.split_text(text) {
            let search_from = (index + previous_len).saturating_sub(self.chunk_overlap);
            index = find_from(text, &chunk, search_from)
                .or_else(|| find_from(text, &chunk, 0))
                .unwrap_or(search_from);
            previous_len = char_len(&chunk);
            located.push((index, chunk));
        }
        located
    }

    /// Split every document, keeping parent metadata and `start_index`
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| {
                self.split_with_offsets(&doc.content)
                    .into_iter()
                    .map(move |(start, content)| Chunk::new(doc, content, start))
            })
            .collect();

        tracing::info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut short_pieces: Vec<String> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                short_pieces.push(piece);
                continue;
            }
            if !short_pieces.is_empty() {
                chunks.extend(self.merge(&short_pieces));
                short_pieces.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !short_pieces.is_empty() {
            chunks.extend(self.merge(&short_pieces));
        }
        chunks
    }

    /// Greedily pack consecutive pieces into windows
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<(&str, usize)> = Default::default();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece.as_str(), len));
            total += len;
        }
        push_trimmed(&mut chunks, &window);
        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<String>, window: &std::collections::VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching it to the start of the following piece
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.graphemes(true).map(str::to_string).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(text[start..pos].to_string());
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Char offset of `needle` in `haystack`, searching from char offset `from`
fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let byte_from = haystack
        .char_indices()
        .nth(from)
        .map(|(i, _)| i)
        .unwrap_or(haystack.len());
    haystack[byte_from..]
        .find(needle)
        .map(|pos| from + char_len(&haystack[byte_from..byte_from + pos]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::{META_SOURCE, META_START_INDEX};
    use proptest::prelude::*;

    #[test]
    fn test_overlap_must_be_smaller() {
        assert!(matches!(TextChunker::new(100, 100), Err(Error::Config(_))));
        assert!(matches!(TextChunker::new(0, 0), Err(Error::Config(_))));
        assert!(TextChunker::new(1000, 200).is_ok());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = TextChunker::new(1000, 200).unwrap();
        assert_eq!(chunker.split_text("  short text \n"), vec!["short text".to_string()]);
        assert!(chunker.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let chunker = TextChunker::new(30, 0).unwrap();
        let text = "first paragraph here\n\nsecond paragraph here";
        assert_eq!(
            chunker.split_text(text),
            vec!["first paragraph here".to_string(), "second paragraph here".to_string()]
        );
    }

    #[test]
    fn test_overlap_is_carried() {
        let chunker = TextChunker::new(10, 4).unwrap();
        let chunks = chunker.split_text("aa bb cc dd ee ff");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail = &pair[0][pair[0].len() - 2..];
            assert!(pair[1].starts_with(tail), "{:?}", pair);
        }
    }

    #[test]
    fn test_long_word_falls_back_to_graphemes() {
        let chunker = TextChunker::new(4, 0).unwrap();
        let chunks = chunker.split_text("абвгдежз");
        assert_eq!(chunks, vec!["абвг".to_string(), "дежз".to_string()]);
        assert_eq!(chunks.concat(), "абвгдежз");
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_split_documents_metadata_and_offsets() {
        let chunker = TextChunker::new(12, 0).unwrap();
        let doc = Document::new("alpha beta\ngamma delta").with_metadata(META_SOURCE, "a.docx");
        let chunks = chunker.split_documents(&[doc]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "alpha beta");
        assert_eq!(chunks[0].start_index, 0);
        assert_eq!(chunks[1].content, "gamma delta");
        assert_eq!(chunks[1].start_index, 11);
        assert_eq!(chunks[1].metadata.get(META_START_INDEX), Some(&serde_json::json!(11)));
        assert_eq!(chunks[1].metadata.get(META_SOURCE), Some(&serde_json::json!("a.docx")));
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        "[a-zа-я .,]{0,60}(\n{1,2}[a-zа-я .,]{0,120}){0,15}"
    }

    proptest! {
        #[test]
        fn prop_chunking_is_deterministic(text in text_strategy(), size in 10usize..200, overlap_pct in 0usize..90) {
            let overlap = size * overlap_pct / 100;
            let chunker = TextChunker::new(size, overlap).unwrap();
            let doc = Document::new(text).with_metadata(META_SOURCE, "p.docx");

            let first = chunker.split_documents(std::slice::from_ref(&doc));
            let second = chunker.split_documents(std::slice::from_ref(&doc));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_chunks_fit_and_are_located(text in text_strategy(), size in 10usize..200, overlap_pct in 0usize..90) {
            let overlap = size * overlap_pct / 100;
            let chunker = TextChunker::new(size, overlap).unwrap();

            for (start, chunk) in chunker.split_with_offsets(&text) {
                prop_assert!(chunk.chars().count() <= size);
                let at: String = text.chars().skip(start).take(chunk.chars().count()).collect();
                prop_assert_eq!(&at, &chunk);
            }
        }
    }
}
