//! Deterministic stand-ins for the extractor, chunker and embedder.

use std::{
    path::Path,
    sync::{Mutex, mpsc},
};

use crate::{
    chunking::Chunker,
    embedding::Embedder,
    error::{Error, Result},
    extract::{Extractor, PageText},
};

pub const DIM: usize = 32;

/// Reads plain-text fixtures; form feeds separate pages.
///
/// A file whose content starts with `BROKEN` fails to extract.
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>> {
        let content = std::fs::read_to_string(path)?;
        if content.starts_with("BROKEN") {
            return Err(Error::Extraction {
                document: path.display().to_string(),
                reason: "fixture marked broken".into(),
            });
        }
        Ok(content
            .split('\x0c')
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| PageText {
                page: i as u32 + 1,
                text: text.trim().to_string(),
            })
            .collect())
    }
}

/// A [`TextExtractor`] that parks on one file name until released.
///
/// Reaching the gated file sends on the `entered` channel, then extraction
/// waits for a message on `release`.
pub struct GatedExtractor {
    gated: &'static str,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedExtractor {
    pub fn new(
        gated: &'static str,
    ) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let extractor = Self {
            gated,
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (extractor, entered_rx, release_tx)
    }
}

impl Extractor for GatedExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>> {
        if path.file_name().is_some_and(|name| name == self.gated) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
        }
        TextExtractor.extract(path)
    }
}

/// Splits on blank lines, one chunk per paragraph.
pub struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        text.split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Hashes lowercase words into a fixed number of buckets.
///
/// Vectors are returned un-normalized, like a raw model output. `calls`
/// and `texts_embedded` count usage.
#[derive(Default)]
pub struct BagOfWords {
    pub calls: usize,
    pub texts_embedded: usize,
}

impl BagOfWords {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[bucket(&word.to_lowercase())] += 1.0;
        }
        // Keeps punctuation-only text from producing a zero vector.
        v[DIM - 1] += 0.01;
        v
    }
}

impl Embedder for BagOfWords {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls += 1;
        self.texts_embedded += texts.len();
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % (DIM as u64 - 1)) as usize
}

/// Write a text fixture into `dir`, creating parent directories.
pub fn write_fixture(dir: &Path, name: &str, pages: &[&str]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, pages.join("\x0c")).unwrap();
}
