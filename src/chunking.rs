//! Splitting page text into overlapping chunks.
//!
//! Chunk sizes are measured in characters as an approximation of token
//! counts (about 4 characters per token for English text). The defaults
//! correspond to 500-token windows with a 100-token overlap.

use crate::error::{Error, Result};

/// Approximate characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Default chunk size in characters (roughly 500 tokens).
pub const DEFAULT_CHUNK_SIZE: usize = 500 * CHARS_PER_TOKEN;

/// Default overlap between adjacent chunks in characters (roughly 100 tokens).
pub const DEFAULT_CHUNK_OVERLAP: usize = 100 * CHARS_PER_TOKEN;

/// How far back from a window end to look for whitespace to break at.
const BOUNDARY_LOOKBACK: usize = 100;

/// Splits raw text into an ordered sequence of overlapping chunks.
pub trait Chunker {
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Character-window chunker with overlap and word-boundary breaks.
///
/// # Examples
///
/// ```
/// use docrag::chunking::{Chunker, WindowChunker};
///
/// let chunker = WindowChunker::new(1000, 200).unwrap();
///
/// // Short text returns a single chunk
/// assert_eq!(chunker.chunk("Hello, world!"), vec!["Hello, world!"]);
///
/// // Long text gets split
/// let text = "word ".repeat(500);
/// assert!(chunker.chunk(&text).len() >= 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WindowChunker {
    chunk_size: usize,
    overlap: usize,
}

impl WindowChunker {
    /// Create a chunker. `overlap` must be strictly less than `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be less than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for WindowChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.chunk_size, self.overlap)
    }
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// Windows that do not reach the end of the text are shortened to the last
/// whitespace within [`BOUNDARY_LOOKBACK`] characters, and the next window
/// starts `overlap` characters before the previous one ended, so no text is
/// skipped. Blank windows are dropped. Handles multi-byte UTF-8 text.
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let char_count = text.chars().count();
    if char_count == 0 {
        return Vec::new();
    }

    if char_count <= chunk_size {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    // Map of char index -> byte index for O(1) slicing.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start_char = 0;

    loop {
        let end_char = (start_char + chunk_size).min(char_count);
        let chunk_end_char = if end_char < char_count {
            find_word_boundary_char(text, &char_to_byte, start_char, end_char)
        } else {
            end_char
        };

        let piece = &text[char_to_byte[start_char]..char_to_byte[chunk_end_char]];
        if !piece.trim().is_empty() {
            chunks.push(piece.to_string());
        }

        if chunk_end_char >= char_count {
            break;
        }

        let next = chunk_end_char.saturating_sub(overlap);
        start_char = if next > start_char {
            next
        } else {
            start_char + (chunk_size - overlap)
        };
    }

    chunks
}

/// Find a char position at or before `pos_char` just after a whitespace
/// character, staying strictly after `start_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    start_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char =
        pos_char.saturating_sub(BOUNDARY_LOOKBACK).max(start_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let region = &text[start_byte..end_byte];

    match region.rfind(char::is_whitespace) {
        Some(ws_offset) => {
            let ws_byte = start_byte + ws_offset;
            // First char that starts after the whitespace byte.
            char_to_byte.partition_point(|&b| b <= ws_byte)
        }
        None => pos_char,
    }
}
