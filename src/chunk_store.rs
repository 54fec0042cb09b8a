use std::{
    collections::{BTreeSet, HashMap},
    io::{BufRead, BufReader},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    data_dir::write_atomic,
    error::{Error, Result},
};

/// One chunk of a source document, as persisted in `chunks.jsonl`.
///
/// Identity is `(document_id, chunk_id)`. `page` is 1-based, `chunk_id`
/// is 0-based and contiguous within a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub page: u32,
    pub chunk_id: u32,
    pub text: String,
}

/// Append-only sequence of chunk records; a record's position is its
/// ordinal id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStore {
    records: Vec<ChunkRecord>,
    /// Number of chunks stored per document, for contiguity checks.
    per_document: HashMap<String, u32>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<&ChunkRecord> {
        self.records.get(ordinal)
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Distinct document ids present in the store.
    pub fn document_ids(&self) -> BTreeSet<String> {
        self.per_document.keys().cloned().collect()
    }

    /// Check that `records` could be appended, without mutating the store.
    ///
    /// Pages must be positive, text non-empty, and chunk ids must continue
    /// each document's sequence without gaps.
    pub fn validate(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut next: HashMap<&str, u32> = HashMap::new();
        for record in records {
            if record.page == 0 {
                return Err(invalid(record, "page numbers start at 1"));
            }
            if record.text.trim().is_empty() {
                return Err(invalid(record, "chunk text is empty"));
            }
            let expected = next.entry(record.document_id.as_str()).or_insert_with(|| {
                self.per_document
                    .get(&record.document_id)
                    .copied()
                    .unwrap_or(0)
            });
            if record.chunk_id != *expected {
                return Err(invalid(
                    record,
                    &format!("expected chunk id {expected}"),
                ));
            }
            *expected += 1;
        }
        Ok(())
    }

    /// Append records after validating the whole batch.
    pub fn append(&mut self, records: Vec<ChunkRecord>) -> Result<()> {
        self.validate(&records)?;
        for record in records {
            *self.per_document.entry(record.document_id.clone()).or_insert(0) +=
                1;
            self.records.push(record);
        }
        Ok(())
    }

    /// Serialize as JSON Lines, one record per line.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_jsonl()?.as_bytes())
    }

    /// Load a store; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord =
                serde_json::from_str(&line).map_err(|e| Error::CorruptStore {
                    path: path.to_path_buf(),
                    reason: format!("line {}: {e}", line_no + 1),
                })?;
            records.push(record);
        }

        let mut store = Self::new();
        store.append(records).map_err(|e| Error::CorruptStore {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(store)
    }
}

fn invalid(record: &ChunkRecord, reason: &str) -> Error {
    Error::InvalidChunk {
        document: record.document_id.clone(),
        chunk_id: record.chunk_id,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(doc: &str, page: u32, chunk_id: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            document_id: doc.to_string(),
            page,
            chunk_id,
            text: text.to_string(),
        }
    }

    #[test]
    fn append_tracks_documents() {
        let mut store = ChunkStore::new();
        store
            .append(vec![
                record("a.pdf", 1, 0, "alpha"),
                record("a.pdf", 2, 1, "beta"),
                record("b.pdf", 1, 0, "gamma"),
            ])
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(2).unwrap().text, "gamma");
        assert_eq!(
            store.document_ids().into_iter().collect::<Vec<_>>(),
            vec!["a.pdf", "b.pdf"]
        );
    }

    #[test]
    fn rejects_gaps_in_chunk_ids() {
        let mut store = ChunkStore::new();
        store.append(vec![record("a.pdf", 1, 0, "alpha")]).unwrap();

        let err = store
            .append(vec![record("a.pdf", 1, 2, "skipped one")])
            .unwrap_err();
        assert!(err.to_string().contains("expected chunk id 1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_zero_page_and_empty_text() {
        let store = ChunkStore::new();
        assert!(matches!(
            store.validate(&[record("a.pdf", 0, 0, "text")]),
            Err(Error::InvalidChunk { chunk_id: 0, .. })
        ));
        assert!(matches!(
            store.validate(&[record("a.pdf", 1, 0, "  ")]),
            Err(Error::InvalidChunk { .. })
        ));
    }

    #[test]
    fn invalid_records_on_disk_are_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            "{\"document_id\":\"a.pdf\",\"page\":0,\"chunk_id\":0,\"text\":\"x\"}\n",
        )
        .unwrap();

        assert!(matches!(
            ChunkStore::load(&path),
            Err(Error::CorruptStore { .. })
        ));
    }

    #[test]
    fn failed_batch_leaves_store_unchanged() {
        let mut store = ChunkStore::new();
        let err = store.append(vec![
            record("a.pdf", 1, 0, "ok"),
            record("a.pdf", 0, 1, "bad page"),
        ]);
        assert!(err.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn jsonl_has_one_record_per_line() {
        let mut store = ChunkStore::new();
        store
            .append(vec![
                record("a.pdf", 1, 0, "line one\nstill one"),
                record("a.pdf", 1, 1, "two"),
            ])
            .unwrap();

        let jsonl = store.to_jsonl().unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["document_id"], "a.pdf");
        assert_eq!(first["page"], 1);
        assert_eq!(first["chunk_id"], 0);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunks.jsonl");

        let mut store = ChunkStore::new();
        store
            .append(vec![record("a.pdf", 3, 0, "héllo wörld")])
            .unwrap();
        store.save(&path).unwrap();

        assert_eq!(ChunkStore::load(&path).unwrap(), store);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ChunkStore::load(&tmp.path().join("chunks.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_line_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunks.jsonl");
        std::fs::write(&path, "{\"document_id\": \"a.pdf\"\n").unwrap();

        assert!(matches!(
            ChunkStore::load(&path),
            Err(Error::CorruptStore { .. })
        ));
    }
}
