use candle_core::Device;
use pylate_rs::ColBERT;
use tracing::{debug, info};

use crate::{
    config_db::ConfigDb,
    embedding::{Embedder, normalize_all},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCRAG_MODEL";
pub const MODEL_SETTING_KEY: &str = "model_name";

/// Texts encoded per forward pass.
const ENCODE_BATCH_SIZE: usize = 32;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the embedding model ID from, in order of priority:
/// 1. An explicit override (from --model)
/// 2. The DOCRAG_MODEL environment variable
/// 3. The `model_name` setting in config.redb
/// 4. [`DEFAULT_MODEL_ID`]
pub fn resolve_model_id(
    explicit: Option<&str>,
    config_db: &ConfigDb,
) -> Result<String> {
    if let Some(model) = explicit {
        return Ok(model.to_string());
    }
    if let Ok(model) = std::env::var(MODEL_ENV_VAR) {
        return Ok(model);
    }
    config_db.get_setting_or(MODEL_SETTING_KEY, DEFAULT_MODEL_ID)
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
///
/// Token-level ColBERT embeddings are mean-pooled into one vector per text
/// and L2-normalized, so inner product equals cosine similarity.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Creates a `ModelManager` for the given model ID (HuggingFace ID or
    /// local path). Nothing is loaded until the first `embed` call.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            info!(model = %self.model_id, "loading embedding model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| Error::Model(format!("{e}")))?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Model("model not loaded".to_string()))
    }

    fn encode_pooled(
        model: &mut ColBERT,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        // [batch, tokens, dim] -> [batch, dim]. Zero padding rows only scale
        // the mean, which normalization removes.
        let tokens = model
            .encode(texts, false)
            .map_err(|e| Error::Model(format!("{e}")))?;
        let pooled = tokens
            .mean(1)
            .map_err(|e| Error::Model(format!("mean pooling failed: {e}")))?;
        pooled
            .to_vec2::<f32>()
            .map_err(|e| Error::Model(format!("tensor conversion failed: {e}")))
    }
}

impl Embedder for ModelManager {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.ensure_loaded()?;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(ENCODE_BATCH_SIZE) {
            debug!(batch = batch.len(), "encoding texts");
            vectors.extend(Self::encode_pooled(model, batch)?);
        }

        normalize_all(&mut vectors)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn empty_batch_does_not_load_model() {
        let mut manager =
            ModelManager::with_model_id(DEFAULT_MODEL_ID.to_string());
        assert!(manager.embed(&[]).unwrap().is_empty());
        assert!(!manager.is_loaded());
    }

    #[test]
    fn explicit_model_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        db.set_setting(MODEL_SETTING_KEY, "stored/model").unwrap();

        assert_eq!(
            resolve_model_id(Some("flag/model"), &db).unwrap(),
            "flag/model"
        );
    }
}
