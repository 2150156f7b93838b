//! Text chunking
//!
//! Splits segment text into bounded, overlapping chunks. All offsets are
//! char offsets, so a multi-byte character is never split. Two strategies:
//! - A fixed sliding window (`size`, `overlap`)
//! - A structural splitter that ends chunks on paragraph/sentence breaks
//!   within the same size budget

mod boundaries;

pub use boundaries::*;

use crate::config::ChunkConfig;
use blake3::Hasher;

/// Splits text into chunks under a character budget
#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
    structural: bool,
}

impl Chunker {
    /// Build a sliding-window chunker.
    ///
    /// A zero size falls back to 500; an overlap that would stall the
    /// window is clamped to half the size.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = if size == 0 { 500 } else { size };
        let overlap = if overlap >= size { size / 2 } else { overlap };
        Self {
            size,
            overlap,
            structural: false,
        }
    }

    pub fn from_config(config: &ChunkConfig) -> Self {
        Self::new(config.size, config.overlap).structural(config.structural)
    }

    /// Prefer natural boundaries over hard cuts
    pub fn structural(mut self, enabled: bool) -> Self {
        self.structural = enabled;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.spans(&chars)
            .into_iter()
            .map(|(start, end)| chars[start..end].iter().collect())
            .collect()
    }

    /// Char ranges `[start, end)` of every chunk
    pub fn spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.size {
            return vec![(0, chars.len())];
        }
        if self.structural {
            self.structural_spans(chars)
        } else {
            self.window_spans(chars.len())
        }
    }

    fn window_spans(&self, total: usize) -> Vec<(usize, usize)> {
        let step = (self.size - self.overlap).max(1);
        let mut spans = Vec::new();
        let mut start = 0;

        while start < total {
            let end = (start + self.size).min(total);
            spans.push((start, end));
            if end == total {
                break;
            }
            start += step;
        }
        spans
    }

    fn structural_spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let total = chars.len();
        let points = find_break_points(chars);
        let mut spans = Vec::new();
        let mut start = 0;

        while start < total {
            let hard_end = (start + self.size).min(total);
            if hard_end == total {
                spans.push((start, total));
                break;
            }

            // Only break in the last fifth of the window so chunks stay full
            let min_end = start + self.size * 4 / 5;
            let end = best_break_in(&points, min_end, hard_end).unwrap_or(hard_end);
            spans.push((start, end));

            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        spans
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_config(&ChunkConfig::default())
    }
}

/// Compute a stable hash for content bytes
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Compute a stable hash for a string
pub fn compute_text_hash(text: &str) -> String {
    compute_content_hash(text.as_bytes())
}
