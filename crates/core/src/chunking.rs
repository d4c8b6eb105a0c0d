use crate::error::IngestError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

pub const DEFAULT_SEPARATOR: &str = "\n";
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separator-aware splitter. Pieces between separators are merged greedily up
/// to `chunk_size` characters and consecutive chunks share a tail of at most
/// `chunk_overlap` characters. Pieces longer than `chunk_size` are cut into
/// fixed windows first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSplitter {
    pub separator: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for CharacterSplitter {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of one document's text with its character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub start_offset: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

impl CharacterSplitter {
    pub fn new(
        separator: impl Into<String>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, IngestError> {
        let splitter = Self {
            separator: separator.into(),
            chunk_size,
            chunk_overlap,
        };
        splitter.validate()?;
        Ok(splitter)
    }

    fn validate(&self) -> Result<(), IngestError> {
        if self.separator.is_empty() {
            return Err(IngestError::InvalidChunkConfig(
                "separator must not be empty".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn split_text(&self, text: &str) -> Result<Vec<TextWindow>, IngestError> {
        self.validate()?;

        let byte_offsets = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect::<Vec<_>>();

        let windows = self
            .merge(self.pieces(text))
            .into_iter()
            .map(|span| TextWindow {
                start_offset: span.start,
                text: text[byte_offsets[span.start]..byte_offsets[span.end]].to_string(),
            })
            .collect();

        Ok(windows)
    }

    /// Splits every document, numbering chunks globally in input order.
    pub fn split_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>, IngestError> {
        let mut chunks = Vec::new();
        let mut cursor = 0u64;

        for document in documents {
            for window in self.split_text(&document.text)? {
                chunks.push(Chunk {
                    chunk_id: make_chunk_id(&document.checksum, cursor, &window.text),
                    source_path: document.source_path.clone(),
                    file_name: document.file_name.clone(),
                    chunk_index: cursor,
                    start_offset: window.start_offset,
                    text: window.text,
                });
                cursor = cursor.saturating_add(1);
            }
        }

        Ok(chunks)
    }

    fn pieces(&self, text: &str) -> Vec<Span> {
        let separator_len = self.separator.chars().count();
        let mut spans = Vec::new();
        let mut cursor = 0usize;

        for piece in text.split(self.separator.as_str()) {
            let piece_len = piece.chars().count();
            let trimmed_len = piece.trim().chars().count();

            if trimmed_len > 0 {
                let leading = piece.chars().take_while(|c| c.is_whitespace()).count();
                let start = cursor + leading;
                self.push_windows(
                    Span {
                        start,
                        end: start + trimmed_len,
                    },
                    &mut spans,
                );
            }

            cursor += piece_len + separator_len;
        }

        spans
    }

    fn push_windows(&self, span: Span, spans: &mut Vec<Span>) {
        if span.len() <= self.chunk_size {
            spans.push(span);
            return;
        }

        let step = self.chunk_size - self.chunk_overlap;
        let mut start = span.start;
        loop {
            let end = (start + self.chunk_size).min(span.end);
            spans.push(Span { start, end });
            if end == span.end {
                break;
            }
            start += step;
        }
    }

    fn merge(&self, pieces: Vec<Span>) -> Vec<Span> {
        let mut merged = Vec::new();
        let mut current: VecDeque<Span> = VecDeque::new();

        for piece in pieces {
            if let (Some(first), Some(last)) = (current.front().copied(), current.back().copied()) {
                if piece.end - first.start > self.chunk_size {
                    merged.push(Span {
                        start: first.start,
                        end: last.end,
                    });

                    while let Some(front) = current.front().copied() {
                        let retained = last.end - front.start;
                        if retained > self.chunk_overlap || piece.end - front.start > self.chunk_size {
                            current.pop_front();
                        } else {
                            break;
                        }
                    }
                }
            }
            current.push_back(piece);
        }

        if let (Some(first), Some(last)) = (current.front(), current.back()) {
            merged.push(Span {
                start: first.start,
                end: last.end,
            });
        }

        merged
    }
}

fn make_chunk_id(checksum: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(checksum.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
