//! docrag - incremental PDF indexing and grounded question answering.
//!
//! docrag extracts text from PDFs, splits it into overlapping chunks, embeds
//! each chunk with a pooled [ColBERT](https://github.com/stanford-futuredata/ColBERT)
//! model and appends the vectors to a local store. Queries are answered by
//! nearest-neighbour search diversified with Maximal Marginal Relevance, and
//! optionally passed to a language model as grounding context.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Mutex;
//!
//! use docrag::{ConfigDb, DataDir, ModelManager, Retriever};
//! use docrag::{indexer::Indexer, settings::Settings};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let settings = Settings::resolve(&config_db).unwrap();
//! let model = Mutex::new(ModelManager::with_model_id(
//!     docrag::model_manager::DEFAULT_MODEL_ID.to_string(),
//! ));
//!
//! let indexer = Indexer::from_settings(data_dir.clone(), &settings).unwrap();
//! let report = indexer
//!     .index_new(&data_dir.documents_dir().unwrap(), &model)
//!     .unwrap();
//! println!("{report}");
//!
//! let retriever = Retriever::open(&data_dir).unwrap();
//! let mut model = model.into_inner().unwrap();
//! let hits = retriever
//!     .search(&mut model, "warranty period", 5, true, settings.mmr_lambda)
//!     .unwrap();
//! for hit in &hits {
//!     println!("{} page {} ({:.3})", hit.chunk.document_id, hit.chunk.page, hit.score);
//! }
//! ```

pub mod answer;
pub mod chunk_store;
pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod indexer;
pub mod ledger;
pub mod mcp;
pub mod mmr;
pub mod model_manager;
pub mod retriever;
pub mod retry;
pub mod search;
pub mod settings;
pub mod store;
pub mod vector_store;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use retriever::Retriever;
pub use store::Store;
