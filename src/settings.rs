use globset::{Glob, GlobMatcher};

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, WindowChunker},
    config_db::ConfigDb,
    error::{Error, Result},
    generation::DEFAULT_GENERATION_MODEL,
    mmr::DEFAULT_LAMBDA,
    model_manager::MODEL_SETTING_KEY,
};

pub const CHUNK_SIZE: &str = "chunk_size";
pub const CHUNK_OVERLAP: &str = "chunk_overlap";
pub const MMR_LAMBDA: &str = "mmr_lambda";
pub const TOP_K: &str = "top_k";
pub const GENERATION_MODEL: &str = "generation_model";
pub const DOCUMENT_GLOB: &str = "document_glob";

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_DOCUMENT_GLOB: &str = "*.pdf";

/// Keys accepted by `config set`, with a short description.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    (MODEL_SETTING_KEY, "embedding model ID or local path"),
    (CHUNK_SIZE, "chunk window size in characters"),
    (CHUNK_OVERLAP, "overlap between adjacent chunks in characters"),
    (MMR_LAMBDA, "MMR relevance weight between 0 and 1"),
    (TOP_K, "default number of chunks to retrieve"),
    (GENERATION_MODEL, "Gemini model used for answers"),
    (DOCUMENT_GLOB, "glob selecting source documents"),
];

/// Effective, validated settings for a data directory.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Settings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub mmr_lambda: f32,
    pub top_k: usize,
    pub generation_model: String,
    pub document_glob: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            mmr_lambda: DEFAULT_LAMBDA,
            top_k: DEFAULT_TOP_K,
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            document_glob: DEFAULT_DOCUMENT_GLOB.to_string(),
        }
    }
}

impl Settings {
    /// Read stored settings, filling in defaults, and validate the result.
    pub fn resolve(config_db: &ConfigDb) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            chunk_size: read(config_db, CHUNK_SIZE, defaults.chunk_size)?,
            chunk_overlap: read(config_db, CHUNK_OVERLAP, defaults.chunk_overlap)?,
            mmr_lambda: read(config_db, MMR_LAMBDA, defaults.mmr_lambda)?,
            top_k: read(config_db, TOP_K, defaults.top_k)?,
            generation_model: config_db
                .get_setting_or(GENERATION_MODEL, &defaults.generation_model)?,
            document_glob: config_db
                .get_setting_or(DOCUMENT_GLOB, &defaults.document_glob)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunker()?;
        self.glob_matcher()?;
        validate_lambda(self.mmr_lambda)?;
        if self.top_k == 0 {
            return Err(Error::Config(format!("{TOP_K} must be at least 1")));
        }
        Ok(())
    }

    pub fn chunker(&self) -> Result<WindowChunker> {
        WindowChunker::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn glob_matcher(&self) -> Result<GlobMatcher> {
        Ok(Glob::new(&self.document_glob)
            .map_err(|e| {
                Error::Config(format!(
                    "invalid {DOCUMENT_GLOB} '{}': {e}",
                    self.document_glob
                ))
            })?
            .compile_matcher())
    }

    /// Validate a single `key = value` pair and store it.
    ///
    /// The whole configuration is re-validated with the new value, so
    /// e.g. an overlap larger than the stored chunk size is rejected.
    pub fn set(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.iter().any(|(k, _)| *k == key) {
            return Err(Error::NotFound {
                kind: "setting",
                name: key.to_string(),
            });
        }
        let mut candidate = Self::resolve(config_db)?;
        match key {
            CHUNK_SIZE => candidate.chunk_size = parse(key, value)?,
            CHUNK_OVERLAP => candidate.chunk_overlap = parse(key, value)?,
            MMR_LAMBDA => candidate.mmr_lambda = parse(key, value)?,
            TOP_K => candidate.top_k = parse(key, value)?,
            GENERATION_MODEL | MODEL_SETTING_KEY if value.trim().is_empty() => {
                return Err(Error::Config(format!("{key} cannot be empty")));
            }
            DOCUMENT_GLOB => candidate.document_glob = value.to_string(),
            _ => {}
        }
        candidate.validate()?;
        config_db.set_setting(key, value)
    }
}

fn validate_lambda(lambda: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&lambda) {
        return Err(Error::Config(format!(
            "{MMR_LAMBDA} must be between 0 and 1, got {lambda}"
        )));
    }
    Ok(())
}

/// Check an MMR lambda given on the command line or over MCP.
pub fn check_lambda(lambda: f32) -> Result<f32> {
    validate_lambda(lambda)?;
    Ok(lambda)
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key}: '{value}' ({e})")))
}

fn read<T: std::str::FromStr>(config_db: &ConfigDb, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match config_db.get_setting(key)? {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}
