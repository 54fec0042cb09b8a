//! Incremental indexing of new source documents.
//!
//! A run discovers documents missing from the ingestion ledger, extracts and
//! chunks them, embeds every new chunk in one batch, appends vectors and
//! chunks to a copy of the current store and commits the files in order:
//! vectors, chunks, then the ledger. A crash before the ledger rename leaves
//! the new documents unledgered; the next run notices their chunks already
//! exist and ledgers them without embedding them again.

use std::{
    collections::BTreeSet,
    fmt,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use globset::{Glob, GlobMatcher};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    chunk_store::ChunkRecord,
    chunking::Chunker,
    data_dir::DataDir,
    embedding::{Embedder, normalize_all},
    error::{Error, Result},
    extract::{Extractor, PdfExtractor},
    ledger::IngestionLedger,
    settings::Settings,
    store::Store,
    walker::{DiscoveredFile, discover_files},
};

/// Outcome of one [`Indexer::index_new`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexingReport {
    /// Documents whose chunks were appended in this run.
    pub indexed: Vec<String>,
    /// Documents that yielded no text; ledgered with zero chunks.
    pub empty: Vec<String>,
    /// Documents already in the stores but missing from the ledger.
    pub recovered: Vec<String>,
    /// Documents that failed to extract, with the reason. Retried next run.
    pub failed: Vec<(String, String)>,
    pub new_chunks: usize,
    pub total_chunks: usize,
    pub total_vectors: usize,
}

impl IndexingReport {
    /// Whether the run changed nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.indexed.is_empty()
            && self.empty.is_empty()
            && self.recovered.is_empty()
    }
}

impl fmt::Display for IndexingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            write!(f, "No new documents to index.")?;
        } else {
            write!(
                f,
                "Indexed {} new document(s). Total chunks: {}",
                self.indexed.len() + self.empty.len(),
                self.total_chunks
            )?;
            if !self.recovered.is_empty() {
                write!(
                    f,
                    " ({} recovered from a previous run)",
                    self.recovered.len()
                )?;
            }
        }
        if !self.failed.is_empty() {
            write!(
                f,
                " {} document(s) failed and will be retried.",
                self.failed.len()
            )?;
        }
        Ok(())
    }
}

/// Exclusive claim on `index.lock`, released on drop.
struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Self {
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::IndexLocked(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release index lock");
        }
    }
}

/// Chunks produced for one document.
struct Prepared {
    document_id: String,
    records: Vec<ChunkRecord>,
}

/// Sole writer of the vector store, chunk store and ingestion ledger.
pub struct Indexer {
    data_dir: DataDir,
    extractor: Box<dyn Extractor + Send + Sync>,
    chunker: Box<dyn Chunker + Send + Sync>,
    matcher: GlobMatcher,
    run_guard: Mutex<()>,
}

impl Indexer {
    pub fn new(
        data_dir: DataDir,
        extractor: Box<dyn Extractor + Send + Sync>,
        chunker: Box<dyn Chunker + Send + Sync>,
        document_glob: &str,
    ) -> Result<Self> {
        let matcher = Glob::new(document_glob)
            .map_err(|e| {
                Error::Config(format!("invalid document glob '{document_glob}': {e}"))
            })?
            .compile_matcher();
        Ok(Self {
            data_dir,
            extractor,
            chunker,
            matcher,
            run_guard: Mutex::new(()),
        })
    }

    /// PDF extraction and window chunking configured from `settings`.
    pub fn from_settings(data_dir: DataDir, settings: &Settings) -> Result<Self> {
        Self::new(
            data_dir,
            Box::new(PdfExtractor),
            Box::new(settings.chunker()?),
            &settings.document_glob,
        )
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Index every document under `source_dir` that is not yet ledgered.
    ///
    /// Runs are single-flight: concurrent calls in this process serialize
    /// on an internal mutex, and a run in another process makes this one
    /// fail with [`Error::IndexLocked`]. `embedder` is locked only for the
    /// batch embed call, so searches sharing it are not held up while
    /// documents are extracted or the store is committed.
    pub fn index_new<E: Embedder + ?Sized>(
        &self,
        source_dir: &Path,
        embedder: &Mutex<E>,
    ) -> Result<IndexingReport> {
        let _guard = self
            .run_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _lock = IndexLock::acquire(&self.data_dir.index_lock())?;

        let files = discover_files(source_dir, &self.matcher)?;
        let mut ledger = IngestionLedger::load(&self.data_dir.ledger())?;
        let store = Store::load(&self.data_dir.store_dir())?;

        let stored: BTreeSet<String> = store.chunks().document_ids();
        let recovered: Vec<String> = stored
            .iter()
            .filter(|id| !ledger.contains(id))
            .cloned()
            .collect();
        for id in &recovered {
            warn!(document = %id, "document has stored chunks but is not ledgered; recovering");
        }

        let candidates: Vec<DiscoveredFile> = files
            .into_iter()
            .filter(|f| {
                let id = f.document_id();
                !ledger.contains(&id) && !stored.contains(&id)
            })
            .collect();
        debug!(candidates = candidates.len(), "discovered new documents");

        let mut report = IndexingReport {
            recovered,
            ..IndexingReport::default()
        };

        let mut prepared = Vec::new();
        for (file, outcome) in candidates
            .par_iter()
            .map(|file| (file, self.prepare(file)))
            .collect::<Vec<_>>()
        {
            match outcome {
                Ok(doc) if doc.records.is_empty() => {
                    info!(document = %doc.document_id, "document has no text");
                    report.empty.push(doc.document_id);
                }
                Ok(doc) => prepared.push(doc),
                Err(e) => {
                    let id = file.document_id();
                    warn!(document = %id, error = %e, "skipping document");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        if prepared.is_empty() && report.is_noop() {
            report.total_chunks = store.chunks().len();
            report.total_vectors = store.vectors().len();
            return Ok(report);
        }

        let mut records = Vec::new();
        for doc in prepared {
            report.indexed.push(doc.document_id);
            records.extend(doc.records);
        }
        report.new_chunks = records.len();

        let mut next = store;
        if !records.is_empty() {
            let texts: Vec<String> =
                records.iter().map(|r| r.text.clone()).collect();
            info!(chunks = texts.len(), "embedding new chunks");
            let mut vectors = {
                let mut embedder = embedder
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                embedder.embed(&texts)?
            };
            if vectors.len() != texts.len() {
                return Err(Error::Model(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            normalize_all(&mut vectors)?;

            next.append(records, &vectors)?;
            next.commit(&self.data_dir.store_dir())?;
        }

        ledger.extend(report.indexed.iter().cloned());
        ledger.extend(report.empty.iter().cloned());
        ledger.extend(report.recovered.iter().cloned());
        ledger.save(&self.data_dir.ledger())?;

        report.total_chunks = next.chunks().len();
        report.total_vectors = next.vectors().len();
        info!(
            indexed = report.indexed.len(),
            new_chunks = report.new_chunks,
            total_chunks = report.total_chunks,
            "indexing run complete"
        );
        Ok(report)
    }

    /// Extract and chunk one document. Chunk ids restart at 0 per document
    /// and continue across pages.
    fn prepare(&self, file: &DiscoveredFile) -> Result<Prepared> {
        let document_id = file.document_id();
        let pages = self.extractor.extract(&file.absolute_path)?;

        let mut records = Vec::new();
        for page in pages {
            for text in self.chunker.chunk(&page.text) {
                records.push(ChunkRecord {
                    document_id: document_id.clone(),
                    page: page.page,
                    chunk_id: records.len() as u32,
                    text,
                });
            }
        }
        Ok(Prepared {
            document_id,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        data_dir::staging_path,
        store::Manifest,
        test_support::{
            BagOfWords,
            GatedExtractor,
            ParagraphChunker,
            TextExtractor,
            write_fixture,
        },
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        source: PathBuf,
        data_dir: DataDir,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        fixture_with(Box::new(TextExtractor))
    }

    fn fixture_with(extractor: Box<dyn Extractor + Send + Sync>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("documents");
        std::fs::create_dir_all(&source).unwrap();
        let data_dir = DataDir::resolve(Some(&tmp.path().join("data"))).unwrap();
        let indexer = Indexer::new(
            data_dir.clone(),
            extractor,
            Box::new(ParagraphChunker),
            "*.pdf",
        )
        .unwrap();
        Fixture {
            _tmp: tmp,
            source,
            data_dir,
            indexer,
        }
    }

    /// Every file in the store directory plus the ledger.
    fn snapshot(data_dir: &DataDir) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files: BTreeMap<PathBuf, Vec<u8>> = std::fs::read_dir(data_dir.store_dir())
            .unwrap()
            .map(|entry| {
                let path = entry.unwrap().path();
                let bytes = std::fs::read(&path).unwrap();
                (path, bytes)
            })
            .collect();
        files.insert(data_dir.ledger(), std::fs::read(data_dir.ledger()).unwrap());
        files
    }

    fn load_store(data_dir: &DataDir) -> Store {
        Store::load(&data_dir.store_dir()).unwrap()
    }

    #[test]
    fn two_page_document_yields_three_aligned_chunks() {
        let f = fixture();
        write_fixture(
            &f.source,
            "report.pdf",
            &["Revenue grew in spring.\n\nCosts fell in summer.", "Outlook is stable."],
        );

        let embedder = Mutex::new(BagOfWords::default());
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();

        assert_eq!(report.indexed, vec!["report.pdf"]);
        assert_eq!(report.new_chunks, 3);
        assert_eq!(report.total_vectors, 3);
        assert_eq!(report.total_chunks, 3);
        assert_eq!(embedder.lock().unwrap().calls, 1);

        let store = load_store(&f.data_dir);
        let pages: Vec<(u32, u32)> = store
            .chunks()
            .records()
            .iter()
            .map(|r| (r.page, r.chunk_id))
            .collect();
        assert_eq!(pages, vec![(1, 0), (1, 1), (2, 2)]);

        // Vector i embeds chunk i.
        for i in 0..store.len() {
            let mut expected = BagOfWords::vector(&store.chunk(i).unwrap().text);
            crate::embedding::normalize(&mut expected).unwrap();
            assert_eq!(store.vector(i).unwrap(), expected.as_slice());
        }
    }

    #[test]
    fn rerun_without_new_documents_is_noop_and_byte_identical() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha beta"]);
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();

        let before = snapshot(&f.data_dir);

        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.to_string(), "No new documents to index.");
        assert_eq!(embedder.lock().unwrap().calls, 1);

        let after = snapshot(&f.data_dir);
        assert_eq!(before, after);
    }

    #[test]
    fn ledgered_document_is_never_reembedded() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha beta"]);
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();

        // Changed content under the same name is still skipped.
        write_fixture(&f.source, "a.pdf", &["completely different text"]);
        write_fixture(&f.source, "b.pdf", &["gamma"]);
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();

        assert_eq!(report.indexed, vec!["b.pdf"]);
        assert_eq!(embedder.lock().unwrap().texts_embedded, 2);
        assert_eq!(report.total_chunks, 2);
    }

    #[test]
    fn failed_document_is_isolated_and_retried() {
        let f = fixture();
        write_fixture(&f.source, "good.pdf", &["alpha"]);
        write_fixture(&f.source, "bad.pdf", &["BROKEN"]);

        let embedder = Mutex::new(BagOfWords::default());
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.indexed, vec!["good.pdf"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad.pdf");

        let ledger = IngestionLedger::load(&f.data_dir.ledger()).unwrap();
        assert!(ledger.contains("good.pdf"));
        assert!(!ledger.contains("bad.pdf"));

        write_fixture(&f.source, "bad.pdf", &["fixed now"]);
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.indexed, vec!["bad.pdf"]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn empty_document_is_ledgered_without_chunks() {
        let f = fixture();
        write_fixture(&f.source, "blank.pdf", &["   "]);

        let embedder = Mutex::new(BagOfWords::default());
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.empty, vec!["blank.pdf"]);
        assert_eq!(report.new_chunks, 0);
        assert_eq!(embedder.lock().unwrap().calls, 0);
        assert!(
            IngestionLedger::load(&f.data_dir.ledger())
                .unwrap()
                .contains("blank.pdf")
        );
    }

    #[test]
    fn unledgered_stored_document_is_recovered_not_reembedded() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha beta"]);
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();

        // Simulate a crash between the store commit and the ledger commit.
        std::fs::remove_file(f.data_dir.ledger()).unwrap();

        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.recovered, vec!["a.pdf"]);
        assert!(report.indexed.is_empty());
        assert_eq!(report.total_chunks, 1);
        assert_eq!(embedder.lock().unwrap().calls, 1);
        assert!(
            IngestionLedger::load(&f.data_dir.ledger())
                .unwrap()
                .contains("a.pdf")
        );
    }

    #[test]
    fn held_lock_file_blocks_run() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha"]);
        std::fs::write(f.data_dir.index_lock(), "").unwrap();

        let embedder = Mutex::new(BagOfWords::default());
        let err = f.indexer.index_new(&f.source, &embedder).unwrap_err();
        assert!(matches!(err, Error::IndexLocked(_)));
        assert_eq!(embedder.lock().unwrap().calls, 0);
    }

    #[test]
    fn lock_is_released_after_run() {
        let f = fixture();
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();
        assert!(!f.data_dir.index_lock().exists());
    }

    #[test]
    fn desynced_store_aborts_run() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha"]);
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();

        let store_dir = f.data_dir.store_dir();
        let manifest = Manifest::read(&store_dir).unwrap().unwrap();
        let mut chunks = load_store(&f.data_dir).chunks().clone();
        chunks
            .append(vec![ChunkRecord {
                document_id: "a.pdf".into(),
                page: 1,
                chunk_id: 1,
                text: "stray".into(),
            }])
            .unwrap();
        chunks.save(&manifest.chunks_path(&store_dir)).unwrap();

        write_fixture(&f.source, "b.pdf", &["beta"]);
        let err = f.indexer.index_new(&f.source, &embedder).unwrap_err();
        assert!(matches!(err, Error::StoreDesync { .. }));
        assert_eq!(embedder.lock().unwrap().calls, 1);
    }

    #[test]
    fn failed_commit_leaves_previous_store_and_retries() {
        let f = fixture();
        write_fixture(&f.source, "a.pdf", &["alpha"]);
        let embedder = Mutex::new(BagOfWords::default());
        f.indexer.index_new(&f.source, &embedder).unwrap();

        let store_dir = f.data_dir.store_dir();
        let current = Manifest::read(&store_dir).unwrap().unwrap();
        let next = Manifest {
            generation: current.generation + 1,
            len: 0,
        };
        // A directory in place of the staged chunk file makes its write fail
        // after the new vectors were written.
        let blocker = staging_path(&next.chunks_path(&store_dir));
        std::fs::create_dir(&blocker).unwrap();

        write_fixture(&f.source, "b.pdf", &["beta"]);
        let err = f.indexer.index_new(&f.source, &embedder).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let store = load_store(&f.data_dir);
        assert_eq!(store.vectors().len(), 1);
        assert_eq!(store.chunks().len(), 1);
        assert!(!next.vectors_path(&store_dir).exists());
        let ledger = IngestionLedger::load(&f.data_dir.ledger()).unwrap();
        assert!(!ledger.contains("b.pdf"));

        std::fs::remove_dir(&blocker).unwrap();
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.indexed, vec!["b.pdf"]);
        assert_eq!(report.total_vectors, 2);
        assert_eq!(load_store(&f.data_dir).len(), 2);
    }

    #[test]
    fn embedder_is_free_while_documents_are_extracted() {
        let (extractor, entered, release) = GatedExtractor::new("slow.pdf");
        let f = fixture_with(Box::new(extractor));
        write_fixture(&f.source, "slow.pdf", &["alpha"]);
        let embedder = Mutex::new(BagOfWords::default());

        std::thread::scope(|s| {
            let run = s.spawn(|| f.indexer.index_new(&f.source, &embedder));
            entered.recv().unwrap();

            let guard = embedder.try_lock().expect("embedder locked during extraction");
            assert_eq!(guard.calls, 0);
            drop(guard);

            release.send(()).unwrap();
            let report = run.join().unwrap().unwrap();
            assert_eq!(report.indexed, vec!["slow.pdf"]);
        });
        assert_eq!(embedder.lock().unwrap().calls, 1);
    }

    #[test]
    fn non_matching_files_are_ignored() {
        let f = fixture();
        write_fixture(&f.source, "notes.txt", &["alpha"]);
        write_fixture(&f.source, "nested/deep.pdf", &["beta"]);

        let embedder = Mutex::new(BagOfWords::default());
        let report = f.indexer.index_new(&f.source, &embedder).unwrap();
        assert_eq!(report.indexed, vec!["nested/deep.pdf"]);
    }

    #[test]
    fn report_display_counts_documents() {
        let report = IndexingReport {
            indexed: vec!["a.pdf".into(), "b.pdf".into()],
            failed: vec![("c.pdf".into(), "bad".into())],
            total_chunks: 7,
            ..IndexingReport::default()
        };
        assert_eq!(
            report.to_string(),
            "Indexed 2 new document(s). Total chunks: 7 \
             1 document(s) failed and will be retried."
        );
    }
}
