use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::{
    chunk_store::ChunkRecord,
    data_dir::DataDir,
    embedding::{Embedder, embed_query},
    error::Result,
    mmr::{self, Candidate},
    store::{Store, StoreStats},
};

/// A ranked chunk returned from a search.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchHit {
    /// 1-based position in the returned list.
    pub rank: usize,
    /// Cosine similarity between the query and the chunk.
    pub score: f32,
    #[serde(flatten)]
    pub chunk: ChunkRecord,
}

/// Read handle over an immutable store snapshot.
///
/// Searches clone the current `Arc<Store>` and run without holding the
/// lock. [`Retriever::reload`] loads a fresh snapshot from disk and swaps
/// it in; searches already running keep the snapshot they started with.
#[derive(Debug)]
pub struct Retriever {
    data_dir: DataDir,
    current: RwLock<Arc<Store>>,
}

impl Retriever {
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        let store = Store::load(&data_dir.store_dir())?;
        Ok(Self {
            data_dir: data_dir.clone(),
            current: RwLock::new(Arc::new(store)),
        })
    }

    /// The snapshot new searches will use.
    pub fn snapshot(&self) -> Arc<Store> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the stores from disk and swap them in.
    ///
    /// The new snapshot is validated before the swap; on error the previous
    /// snapshot stays current.
    pub fn reload(&self) -> Result<StoreStats> {
        let store = Store::load(&self.data_dir.store_dir())?;
        let stats = store.stats();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(store);
        info!(
            vectors = stats.total_vectors,
            chunks = stats.total_chunks,
            "reloaded store"
        );
        Ok(stats)
    }

    pub fn stats(&self) -> StoreStats {
        self.snapshot().stats()
    }

    /// Embed `query` and return up to `top_k` chunks.
    ///
    /// With `use_rerank`, `max(top_k * 4, 20)` nearest neighbours are
    /// reranked with MMR and returned in selection order; otherwise the
    /// `top_k` nearest neighbours are returned by similarity.
    pub fn search<E: Embedder + ?Sized>(
        &self,
        embedder: &mut E,
        query: &str,
        top_k: usize,
        use_rerank: bool,
        lambda: f32,
    ) -> Result<Vec<SearchHit>> {
        search_snapshot(&self.snapshot(), embedder, query, top_k, use_rerank, lambda)
    }
}

/// Search a specific snapshot.
///
/// An empty store or `top_k == 0` returns no hits without calling the
/// embedder.
pub fn search_snapshot<E: Embedder + ?Sized>(
    store: &Store,
    embedder: &mut E,
    query: &str,
    top_k: usize,
    use_rerank: bool,
    lambda: f32,
) -> Result<Vec<SearchHit>> {
    if store.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embed_query(embedder, query)?;
    let fetch = if use_rerank {
        mmr::candidate_count(top_k)
    } else {
        top_k
    };
    let neighbours = store.vectors().search(&query_vector, fetch)?;
    debug!(candidates = neighbours.len(), top_k, use_rerank, "vector search");

    let ranked = if use_rerank {
        let candidates: Vec<Candidate<'_>> = neighbours
            .iter()
            .filter_map(|&(ordinal, _)| {
                store
                    .vector(ordinal)
                    .map(|vector| Candidate { ordinal, vector })
            })
            .collect();
        mmr::select(&query_vector, &candidates, top_k, lambda)
    } else {
        neighbours
    };

    Ok(ranked
        .into_iter()
        .filter_map(|(ordinal, score)| {
            store.chunk(ordinal).cloned().map(|chunk| (score, chunk))
        })
        .enumerate()
        .map(|(i, (score, chunk))| SearchHit {
            rank: i + 1,
            score,
            chunk,
        })
        .collect())
}
