use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.1;
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Failure reported by a [`Generator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The service is at capacity; the same request may succeed later.
    #[error("generation service overloaded: {0}")]
    Overloaded(String),

    #[error("generation failed: {0}")]
    Failed(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }
}

/// Produces answer text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
    ) -> std::result::Result<String, GenerationError>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    /// Create a client that takes its key from `GEMINI_API_KEY`.
    ///
    /// A missing key is not an error here; every `generate` call fails
    /// instead, so the rest of the system works without credentials.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        Self::with_api_key(model, std::env::var(API_KEY_ENV_VAR).ok())
    }

    pub fn with_api_key(
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/models/{}:generateContent", self.model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Map a non-success HTTP status to a failure class.
fn classify(status: StatusCode, body: &str) -> GenerationError {
    let message = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GenerationError::Overloaded(message)
    } else {
        GenerationError::Failed(message)
    }
}

/// Concatenated text of the first candidate.
fn response_text(
    response: GenerateResponse,
) -> std::result::Result<String, GenerationError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::Failed(
            "response contained no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
    ) -> std::result::Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::Failed(format!("{API_KEY_ENV_VAR} is not set"))
        })?;

        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "calling generation service");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GenerationError::Overloaded(e.to_string())
                } else {
                    GenerationError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            GenerationError::Failed(format!("invalid response body: {e}"))
        })?;
        response_text(parsed)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
