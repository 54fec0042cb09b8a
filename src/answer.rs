//! Grounded question answering over retrieved chunks.

use std::{
    fmt::Write as _,
    sync::{Arc, Mutex},
};

use tracing::{info, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    generation::Generator,
    retriever::{Retriever, SearchHit},
    retry::{RetryError, RetryPolicy},
};

/// Returned when retrieval finds nothing; the generator is not called.
pub const NO_INFORMATION: &str =
    "No relevant information found in the documents.";

/// Returned when every attempt hit a transient overload.
pub const OVERLOADED: &str = "The language model is temporarily overloaded. \
                              Please try again in a few moments.";

/// What the model is told to say when the context is insufficient.
pub const INSUFFICIENT_CONTEXT: &str =
    "I don't know based on the provided documents.";

/// An answer together with the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AnswerOutcome {
    pub answer: String,
    pub sources: Vec<SearchHit>,
}

/// Render retrieved chunks as labelled context blocks.
pub fn build_context(hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            context.push_str("\n\n");
        }
        let _ = write!(
            context,
            "[Source: {} | page {}]\n{}",
            hit.chunk.document_id, hit.chunk.page, hit.chunk.text
        );
    }
    context
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a question-answering system.\n\
         Use ONLY the information provided in the context.\n\
         If the answer is not present, say \"{INSUFFICIENT_CONTEXT}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer (with citations):\n"
    )
}

/// Retrieves context for a question and asks the generator to answer it.
pub struct Answerer {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    mmr_lambda: f32,
}

impl Answerer {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        retry: RetryPolicy,
        mmr_lambda: f32,
    ) -> Self {
        Self {
            retriever,
            generator,
            retry,
            mmr_lambda,
        }
    }

    pub async fn answer<E: Embedder + ?Sized>(
        &self,
        embedder: &Mutex<E>,
        question: &str,
        top_k: usize,
    ) -> Result<String> {
        Ok(self
            .answer_with_sources(embedder, question, top_k)
            .await?
            .answer)
    }

    /// Answer `question` from the top `top_k` reranked chunks.
    ///
    /// No hits yields [`NO_INFORMATION`]. Exhausted overload retries yield
    /// [`OVERLOADED`]. Permanent generation failures are returned as
    /// [`Error::Generation`].
    pub async fn answer_with_sources<E: Embedder + ?Sized>(
        &self,
        embedder: &Mutex<E>,
        question: &str,
        top_k: usize,
    ) -> Result<AnswerOutcome> {
        let hits = {
            let mut embedder = embedder
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.retriever.search(
                &mut *embedder,
                question,
                top_k,
                true,
                self.mmr_lambda,
            )?
        };

        if hits.is_empty() {
            return Ok(AnswerOutcome {
                answer: NO_INFORMATION.to_string(),
                sources: hits,
            });
        }

        let prompt = build_prompt(&build_context(&hits), question);
        info!(
            generator = self.generator.name(),
            sources = hits.len(),
            "generating answer"
        );

        let generator = &self.generator;
        let prompt = prompt.as_str();
        let answer = match self
            .retry
            .run(|_| async move { generator.generate(prompt).await })
            .await
        {
            Ok(text) => text,
            Err(RetryError::Exhausted { attempts, .. }) => {
                warn!(attempts, "giving up on overloaded generator");
                OVERLOADED.to_string()
            }
            Err(RetryError::Permanent(e)) => return Err(Error::Generation(e)),
        };

        Ok(AnswerOutcome {
            answer,
            sources: hits,
        })
    }
}
