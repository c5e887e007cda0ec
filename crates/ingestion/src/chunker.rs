//! Text chunking module
//!
//! Splits extracted text into overlapping, size-bounded chunks. Sizes are
//! counted in characters. Every chunk after the first starts exactly
//! `overlap_size` characters before the end of its predecessor, so the chunks
//! reassemble into the original text once the overlaps are dropped.

use ragforge_common::config::ChunkingSettings;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::models::{CharSpan, Chunk};

/// Chunking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap_size: usize,
}

impl Chunker {
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(AppError::Configuration {
                message: "max_chunk_size must be greater than zero".to_string(),
            });
        }
        if overlap_size >= max_chunk_size {
            return Err(AppError::Configuration {
                message: format!(
                    "overlap_size ({}) must be smaller than max_chunk_size ({})",
                    overlap_size, max_chunk_size
                ),
            });
        }
        Ok(Self { max_chunk_size, overlap_size })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Self::new(settings.max_chunk_size, settings.overlap_size)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Lazily split `text` into chunks of `source_id`
    ///
    /// The iterator can be cloned to restart from its current position, and
    /// calling this again always yields the same sequence.
    pub fn chunks<'a>(&self, source_id: &'a str, text: &str) -> ChunkIter<'a> {
        ChunkIter {
            policy: *self,
            source_id,
            chars: text.chars().collect(),
            next_start: 0,
            sequence_index: 0,
            finished: false,
        }
    }
}

/// Iterator over the chunks of one document
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    policy: Chunker,
    source_id: &'a str,
    chars: Vec<char>,
    next_start: usize,
    sequence_index: usize,
    finished: bool,
}

impl ChunkIter<'_> {
    /// End of the chunk starting at `start`, preferring natural breaks
    ///
    /// A break is only accepted past `start + overlap_size` so the next
    /// chunk always starts further along than this one.
    fn chunk_end(&self, start: usize) -> usize {
        let hard_end = (start + self.policy.max_chunk_size).min(self.chars.len());
        if hard_end == self.chars.len() {
            return hard_end;
        }

        // Only look at the back half so breaks do not produce tiny chunks
        let earliest = start + (self.policy.overlap_size + 1).max(self.policy.max_chunk_size / 2);
        if earliest >= hard_end {
            return hard_end;
        }

        let window = earliest..=hard_end;
        let chars = &self.chars;

        let paragraph = |end: usize| chars[end - 1] == '\n' && chars[end - 2] == '\n';
        let sentence = |end: usize| {
            chars[end - 1].is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
        };
        let whitespace = |end: usize| chars[end - 1].is_whitespace();

        window
            .clone()
            .rev()
            .find(|&end| end >= 2 && paragraph(end))
            .or_else(|| window.clone().rev().find(|&end| end >= 2 && sentence(end)))
            .or_else(|| window.clone().rev().find(|&end| whitespace(end)))
            .unwrap_or(hard_end)
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished || self.chars.is_empty() {
            return None;
        }

        let start = self.next_start;
        let end = self.chunk_end(start);
        let text: String = self.chars[start..end].iter().collect();

        let chunk = Chunk::new(self.source_id, self.sequence_index, text, CharSpan { start, end });

        if end == self.chars.len() {
            self.finished = true;
        } else {
            self.next_start = end - self.policy.overlap_size;
        }
        self.sequence_index += 1;

        Some(chunk)
    }
}
