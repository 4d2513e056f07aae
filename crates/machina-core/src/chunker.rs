//! Sentence-aware, overlapping passage splitter.
//!
//! Sizes are counted in characters. A window is cut at the last sentence
//! terminator it contains (`.`, `!` or `?` followed by whitespace, or a blank
//! line); without one it is hard-cut at `chunk_size`. Consecutive windows
//! overlap by `overlap` characters.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 500, overlap: 50 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than zero".to_string()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self { config: ChunkingConfig::default() }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        Self::from_config(ChunkingConfig { chunk_size, overlap })
    }

    pub fn from_config(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily split `text`. Every call starts a fresh pass over the input.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            text,
            chars: text.char_indices().collect(),
            start: 0,
            size: self.config.chunk_size,
            overlap: self.config.overlap,
            done: false,
        }
    }
}

/// Split `text` into passages of at most `chunk_size` characters.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Chunks<'_>> {
    Ok(Chunker::new(chunk_size, overlap)?.chunks(text))
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    start: usize,
    size: usize,
    overlap: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    fn byte_at(&self, char_idx: usize) -> usize {
        self.chars.get(char_idx).map_or(self.text.len(), |(b, _)| *b)
    }

    /// Last cut position in `(start + overlap, window_end]` that ends a sentence.
    fn sentence_cut(&self, window_end: usize) -> Option<usize> {
        let floor = self.start + self.overlap;
        // `i` is the first char of a two-char terminator that must fit in the window
        let mut i = window_end.checked_sub(2)?;
        while i + 1 > floor && i >= self.start {
            let (_, a) = self.chars[i];
            let (_, b) = self.chars[i + 1];
            let ends_sentence = matches!(a, '.' | '!' | '?') && b.is_whitespace();
            if ends_sentence || (a == '\n' && b == '\n') {
                return Some(i + 1);
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }
        None
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.chars.len();
        while !self.done {
            if self.start >= total {
                self.done = true;
                break;
            }
            let window_end = self.start + self.size;
            let end = if window_end >= total {
                self.done = true;
                total
            } else {
                self.sentence_cut(window_end).unwrap_or(window_end)
            };
            let passage = self.text[self.byte_at(self.start)..self.byte_at(end)].trim();
            if !self.done {
                // end > start + overlap, so the window always advances
                self.start = end - self.overlap;
            }
            if !passage.is_empty() {
                return Some(passage);
            }
        }
        None
    }
}
