use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    chunk_store::{ChunkRecord, ChunkStore},
    data_dir::{staging_path, write_atomic},
    error::{Error, Result},
    vector_store::VectorStore,
};

/// File inside the store directory naming the committed generation.
pub const MANIFEST_FILE: &str = "CURRENT";

const VECTORS_PREFIX: &str = "vectors-";
const VECTORS_EXT: &str = ".bin";
const CHUNKS_PREFIX: &str = "chunks-";
const CHUNKS_EXT: &str = ".jsonl";

/// The committed store generation.
///
/// Each commit writes `vectors-N.bin` and `chunks-N.jsonl` under a fresh
/// generation number. Neither is visible to readers until `CURRENT` is
/// renamed to point at them, so the pair is always read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub len: usize,
}

impl Manifest {
    /// Read `CURRENT`; `None` when nothing has been committed yet.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                Error::CorruptStore {
                    path,
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn vectors_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!(
            "{VECTORS_PREFIX}{:08}{VECTORS_EXT}",
            self.generation
        ))
    }

    pub fn chunks_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{CHUNKS_PREFIX}{:08}{CHUNKS_EXT}", self.generation))
    }
}

/// Generation number encoded in a store file name, staged or not.
fn file_generation(name: &str) -> Option<u64> {
    let name = name.strip_suffix(".tmp").unwrap_or(name);
    [(VECTORS_PREFIX, VECTORS_EXT), (CHUNKS_PREFIX, CHUNKS_EXT)]
        .iter()
        .find_map(|(prefix, ext)| {
            name.strip_prefix(prefix)?.strip_suffix(ext)?.parse().ok()
        })
}

/// Best-effort removal of files from an uncommitted generation.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        for candidate in [path.clone(), staging_path(path)] {
            match std::fs::remove_file(&candidate) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "failed to discard staged store file");
                }
            }
        }
    }
}

/// Remove generations older than `keep_from`.
///
/// The generation that was current before a commit is kept, so a reader
/// that read `CURRENT` just before the switch can still open its files.
fn prune(dir: &Path, keep_from: u64) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to list store directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(generation) = name.to_str().and_then(file_generation) else {
            continue;
        };
        if generation < keep_from {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "failed to prune old store file");
            }
        }
    }
}

/// Vector store and chunk store kept in positional lockstep.
///
/// Vector `i` embeds chunk record `i`. The two halves are never exposed
/// mutably; [`Store::append`] is the only write path and either extends
/// both or neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    vectors: VectorStore,
    chunks: ChunkStore,
}

/// Point-in-time counts for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub total_chunks: usize,
    pub total_documents: usize,
    pub dimension: Option<usize>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the committed generation from `dir` and check that it lines up.
    ///
    /// A directory without `CURRENT` is an empty store.
    pub fn load(dir: &Path) -> Result<Self> {
        let Some(manifest) = Manifest::read(dir)? else {
            return Ok(Self::new());
        };
        let vectors_path = manifest.vectors_path(dir);
        let chunks_path = manifest.chunks_path(dir);
        for path in [&vectors_path, &chunks_path] {
            if !path.is_file() {
                return Err(Error::CorruptStore {
                    path: path.clone(),
                    reason: format!(
                        "missing file for generation {}",
                        manifest.generation
                    ),
                });
            }
        }

        let store = Self {
            vectors: VectorStore::load(&vectors_path)?,
            chunks: ChunkStore::load(&chunks_path)?,
        };
        store.check_alignment()?;
        if store.len() != manifest.len {
            return Err(Error::CorruptStore {
                path: dir.join(MANIFEST_FILE),
                reason: format!(
                    "generation {} should hold {} entries, found {}",
                    manifest.generation,
                    manifest.len,
                    store.len()
                ),
            });
        }
        info!(
            generation = manifest.generation,
            vectors = store.vectors.len(),
            chunks = store.chunks.len(),
            "loaded store"
        );
        Ok(store)
    }

    /// Write both halves as a new generation and switch `CURRENT` to it.
    ///
    /// Renaming `CURRENT` is the only commit point. On any earlier failure
    /// the staged files are removed and the previous generation stays
    /// current.
    pub fn commit(&self, dir: &Path) -> Result<Manifest> {
        self.check_alignment()?;
        std::fs::create_dir_all(dir)?;

        let previous = Manifest::read(dir)?;
        let manifest = Manifest {
            generation: previous.map_or(1, |m| m.generation + 1),
            len: self.len(),
        };

        if let Err(e) = self.write_generation(dir, &manifest) {
            discard(&[manifest.vectors_path(dir), manifest.chunks_path(dir)]);
            return Err(e);
        }
        if let Some(previous) = previous {
            prune(dir, previous.generation);
        }

        info!(
            generation = manifest.generation,
            entries = manifest.len,
            "committed store"
        );
        Ok(manifest)
    }

    fn write_generation(&self, dir: &Path, manifest: &Manifest) -> Result<()> {
        self.vectors.save(&manifest.vectors_path(dir))?;
        self.chunks.save(&manifest.chunks_path(dir))?;
        write_atomic(&dir.join(MANIFEST_FILE), &serde_json::to_vec(manifest)?)
    }

    /// Append records with their vectors as one unit.
    ///
    /// Both batches are validated before either store is touched, so a
    /// failure leaves the store exactly as it was.
    pub fn append(
        &mut self,
        records: Vec<ChunkRecord>,
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if records.len() != vectors.len() {
            return Err(Error::StoreDesync {
                vectors: self.vectors.len() + vectors.len(),
                chunks: self.chunks.len() + records.len(),
            });
        }
        self.vectors.validate(vectors)?;
        self.chunks.validate(&records)?;

        self.vectors.append(vectors)?;
        self.chunks.append(records)?;
        self.check_alignment()
    }

    pub fn check_alignment(&self) -> Result<()> {
        let (vectors, chunks) = (self.vectors.len(), self.chunks.len());
        if vectors != chunks {
            return Err(Error::StoreDesync { vectors, chunks });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn chunk(&self, ordinal: usize) -> Option<&ChunkRecord> {
        self.chunks.get(ordinal)
    }

    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        self.vectors.reconstruct(ordinal)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_vectors: self.vectors.len(),
            total_chunks: self.chunks.len(),
            total_documents: self.chunks.document_ids().len(),
            dimension: self.vectors.dimension(),
        }
    }
}
