//! Sentence-aware chunking with overlap and cross-page carry-over.
//!
//! The chunker is called once per page with the previous page's unfinished tail already
//! prepended. Sizes are counted in Unicode scalar values, so cuts never land inside a
//! multi-byte character.
//!
//! - Each window `[pos, pos + max)` is cut after the last `.`, `?` or `!` inside it, else at
//!   the last whitespace, else exactly at `max`.
//! - The next window starts `overlap` characters before the cut so neighbouring chunks share
//!   context. When that would not move forward, it starts at the cut instead.
//! - Whatever remains once the window reaches the end of the text is returned as carry-over
//!   instead of being emitted; the orchestrator either merges it with the next page or flushes
//!   it when the document ends.

use super::types::{Chunk, ChunkingError, DocumentMetadata};

/// Output of one chunking pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPass {
    /// Chunks finalized during this pass, in reading order.
    pub chunks: Vec<Chunk>,
    /// Trailing text that still waits for more input.
    pub carryover: String,
}

/// Splits page text into bounded, overlapping chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker, rejecting settings that could not guarantee progress.
    pub fn new(max_chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if max_chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= max_chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                max: max_chunk_size,
                overlap,
            });
        }
        Ok(Self {
            max_chunk_size,
            overlap,
        })
    }

    /// Maximum chunk length in characters.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Chunk `text`, attributing every finalized chunk to `page_num`.
    pub fn chunk(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
        page_num: u32,
        total_pages: u32,
    ) -> ChunkPass {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len <= self.max_chunk_size {
            return ChunkPass {
                chunks: Vec::new(),
                carryover: text.trim().to_string(),
            };
        }

        let mut chunks = Vec::new();
        let mut pos = 0;
        let carryover = loop {
            let window_end = pos + self.max_chunk_size;
            if window_end >= len {
                break collect_trimmed(&chars[pos..]);
            }

            let cut = find_cut(&chars, pos, window_end);
            let content = collect_trimmed(&chars[pos..cut]);
            if !content.is_empty() {
                chunks.push(build_chunk(content, metadata, page_num, total_pages));
            }

            let mut next = cut.saturating_sub(self.overlap);
            if next <= pos {
                next = cut;
            }
            pos = next;
        };

        tracing::trace!(
            page = page_num,
            chunks = chunks.len(),
            carryover_chars = carryover.chars().count(),
            "Chunked page text"
        );

        ChunkPass { chunks, carryover }
    }

    /// Turn leftover carry-over into the document's final chunk, if any text remains.
    pub fn flush(
        &self,
        carryover: &str,
        metadata: &DocumentMetadata,
        page_num: u32,
        total_pages: u32,
    ) -> Option<Chunk> {
        let content = carryover.trim();
        if content.is_empty() {
            None
        } else {
            Some(build_chunk(
                content.to_string(),
                metadata,
                page_num,
                total_pages,
            ))
        }
    }
}

/// Prefix cleaned page text with the previous page's carry-over.
pub fn merge_carryover(carryover: &str, page_text: &str) -> String {
    match (carryover.is_empty(), page_text.is_empty()) {
        (true, _) => page_text.to_string(),
        (false, true) => carryover.to_string(),
        (false, false) => format!("{carryover} {page_text}"),
    }
}

/// Pick the cut position for the window `[pos, window_end]`; always returns a value in
/// `(pos, window_end]`.
fn find_cut(chars: &[char], pos: usize, window_end: usize) -> usize {
    if let Some(index) = (pos + 1..window_end)
        .rev()
        .find(|&index| matches!(chars[index], '.' | '?' | '!'))
    {
        return index + 1;
    }

    if let Some(index) = (pos + 1..=window_end)
        .rev()
        .find(|&index| chars[index].is_whitespace())
    {
        return index;
    }

    window_end
}

fn collect_trimmed(chars: &[char]) -> String {
    chars.iter().collect::<String>().trim().to_string()
}

fn build_chunk(
    content: String,
    metadata: &DocumentMetadata,
    page_num: u32,
    total_pages: u32,
) -> Chunk {
    Chunk {
        content,
        page_num,
        total_pages,
        title: metadata.title.clone(),
        source: metadata.source.clone(),
        tags: metadata.tags.clone(),
        created_at: metadata.created_at,
    }
}
