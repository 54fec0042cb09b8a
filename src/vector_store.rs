use std::path::Path;

use rayon::prelude::*;

use crate::{
    data_dir::write_atomic,
    embedding::{dot, is_unit},
    error::{Error, Result},
};

const MAGIC: &[u8; 4] = b"DRVS";
const FORMAT_VERSION: u32 = 1;

/// Header size: 4 bytes magic + 4 bytes version + 4 bytes dimension +
/// 8 bytes vector count.
const HEADER_SIZE: usize = 20;

/// Exact inner-product index over unit-normalized vectors.
///
/// A vector's position in insertion order is its ordinal id. Vectors are
/// kept in one flat row-major buffer, so [`VectorStore::reconstruct`] returns
/// exactly what was appended.
///
/// Binary format on disk:
/// - 4 bytes: magic `DRVS`
/// - 4 bytes: format version (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - 8 bytes: vector count N (u64 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        match self.dimension {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension fixed by the first append, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Check that `vectors` could be appended, without mutating the store.
    pub fn validate(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(Error::InvalidEmbedding(
                "vectors must have at least one dimension".into(),
            ));
        }
        for (i, vector) in vectors.iter().enumerate() {
            if vector.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if !is_unit(vector) {
                return Err(Error::InvalidEmbedding(format!(
                    "vector {i} of the batch is not unit-normalized"
                )));
            }
        }
        Ok(())
    }

    /// Append vectors, fixing the dimension on the first call.
    ///
    /// The whole batch is validated before anything is written; on error the
    /// store is unchanged.
    pub fn append(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        self.validate(vectors)?;
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let dim = *self.dimension.get_or_insert(first.len());
        self.data.reserve(vectors.len() * dim);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// The exact stored vector for an ordinal id.
    pub fn reconstruct(&self, ordinal: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        let start = ordinal.checked_mul(dim)?;
        self.data.get(start..start + dim)
    }

    /// Top-`k` ordinals by inner product with `query`.
    ///
    /// Results are ordered by descending score, ties broken by ascending
    /// ordinal. An empty store yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .par_chunks_exact(dim)
            .map(|row| dot(query, row))
            .enumerate()
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let dim = self.dimension.unwrap_or(0);
        let mut bytes =
            Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(&self.data[..]));
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        let le: Vec<u32> = self.data.iter().map(|v| v.to_bits().to_le()).collect();
        bytes.extend_from_slice(bytemuck::cast_slice(&le));
        bytes
    }

    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptStore {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing vector store header".into()));
        }
        let version = u32::from_le_bytes(read_array(&bytes[4..8]));
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let dim = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
        let count = u64::from_le_bytes(read_array(&bytes[12..20])) as usize;

        let expected_len = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected_len != Some(bytes.len()) {
            return Err(corrupt(format!(
                "header declares {count} x {dim} vectors but file has {} bytes",
                bytes.len()
            )));
        }

        let data: Vec<f32> = bytes[HEADER_SIZE..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(read_array(b)))
            .collect();

        Ok(Self {
            dimension: (dim > 0).then_some(dim),
            data,
        })
    }

    /// Persist the store as a single blob.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes())
    }

    /// Load a store; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_bytes(path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
