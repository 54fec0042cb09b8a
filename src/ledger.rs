use std::{collections::BTreeSet, path::Path};

use crate::{
    data_dir::write_atomic,
    error::{Error, Result},
};

/// Set of document ids whose chunks and vectors are already stored.
///
/// Persisted as a sorted JSON array in `indexed_files.json`. A document in
/// the ledger is never extracted or embedded again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionLedger {
    documents: BTreeSet<String>,
}

impl IngestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.documents.contains(document_id)
    }

    /// Returns `true` if the document was not already present.
    pub fn insert(&mut self, document_id: impl Into<String>) -> bool {
        self.documents.insert(document_id.into())
    }

    pub fn extend<I>(&mut self, document_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.documents.extend(document_ids);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(String::as_str)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.documents)?;
        write_atomic(path, json.as_bytes())
    }

    /// Load the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let documents: BTreeSet<String> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::CorruptStore {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self { documents })
    }
}
