use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    answer::Answerer,
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::Embedder,
    error,
    generation::{GeminiGenerator, Generator},
    indexer::Indexer,
    model_manager::{ModelManager, resolve_model_id},
    retriever::{Retriever, SearchHit},
    retry::RetryPolicy,
    search,
    settings::{Settings, check_lambda},
    store::StoreStats,
};

pub struct RagState {
    data_dir: DataDir,
    settings: Settings,
    retriever: Arc<Retriever>,
    indexer: Indexer,
    model: Mutex<Box<dyn Embedder + Send>>,
    answerer: Answerer,
}

impl RagState {
    pub fn new(
        data_dir: DataDir,
        settings: Settings,
        indexer: Indexer,
        model: Box<dyn Embedder + Send>,
        generator: Arc<dyn Generator>,
    ) -> error::Result<Self> {
        let retriever = Arc::new(Retriever::open(&data_dir)?);
        let answerer = Answerer::new(
            Arc::clone(&retriever),
            generator,
            RetryPolicy::default(),
            settings.mmr_lambda,
        );
        Ok(Self {
            data_dir,
            settings,
            retriever,
            indexer,
            model: Mutex::new(model),
            answerer,
        })
    }
}

#[derive(Clone)]
pub struct RagMcpServer {
    state: Arc<RagState>,
    tool_router: ToolRouter<Self>,
}

impl RagMcpServer {
    pub fn new(state: RagState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl RagMcpServer {
    /// Semantic search over indexed chunks with optional MMR reranking.
    #[tool(
        name = "rag_search",
        description = "Search indexed PDF chunks by meaning. Results are diversified with MMR unless rerank is false."
    )]
    pub async fn rag_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = params.top_k.unwrap_or(self.state.settings.top_k);
        let lambda = check_lambda(
            params.lambda.unwrap_or(self.state.settings.mmr_lambda),
        )
        .map_err(|e| invalid_params("invalid lambda", e))?;

        let hits = {
            let mut model = self.state.model.lock().map_err(|_| {
                rmcp::ErrorData::internal_error("model lock poisoned", None)
            })?;
            self.state
                .retriever
                .search(
                    &mut *model,
                    &params.query,
                    top_k,
                    params.rerank.unwrap_or(true),
                    lambda,
                )
                .map_err(|e| mcp_error("search failed", e))?
        };

        let summary = format_search_summary(&hits, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(structured_result(summary, structured))
    }

    /// Answer a question grounded in retrieved chunks.
    #[tool(
        name = "rag_ask",
        description = "Answer a question using only the indexed documents. Returns the answer and the chunks it was based on."
    )]
    pub async fn rag_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = params.top_k.unwrap_or(self.state.settings.top_k);

        let outcome = self
            .state
            .answerer
            .answer_with_sources(&self.state.model, &params.question, top_k)
            .await
            .map_err(|e| mcp_error("answer failed", e))?;

        let summary = search::format_answer(&outcome);
        let structured = serde_json::to_value(&outcome)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;
        Ok(structured_result(summary, structured))
    }

    /// Index new documents, then reload the search snapshot.
    #[tool(
        name = "rag_index_new",
        description = "Index documents that have not been indexed yet, then reload the search index."
    )]
    pub async fn rag_index_new(
        &self,
        params: Parameters<IndexParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let source = match params.0.source {
            Some(source) => source,
            None => self
                .state
                .data_dir
                .documents_dir()
                .map_err(|e| mcp_error("documents directory unavailable", e))?,
        };

        // Extraction and commit block; keep them off the async workers.
        let state = Arc::clone(&self.state);
        let report = tokio::task::spawn_blocking(move || {
            state.indexer.index_new(&source, &state.model)
        })
        .await
        .map_err(|e| mcp_error("indexing task failed", e))?
        .map_err(|e| mcp_error("indexing failed", e))?;
        let stats = self
            .state
            .retriever
            .reload()
            .map_err(|e| mcp_error("reload failed", e))?;

        let structured = json!({ "report": report, "stats": stats });
        Ok(structured_result(report.to_string(), structured))
    }

    /// Reload the stores written by another process.
    #[tool(
        name = "rag_reload",
        description = "Reload the vector and chunk stores from disk after an external indexing run."
    )]
    pub async fn rag_reload(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self
            .state
            .retriever
            .reload()
            .map_err(|e| mcp_error("reload failed", e))?;
        stats_result(&stats)
    }

    /// Counts for the current snapshot.
    #[tool(
        name = "rag_stats",
        description = "Show the number of indexed documents, chunks and vectors."
    )]
    pub async fn rag_stats(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        stats_result(&self.state.retriever.stats())
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for RagMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "docrag".to_string(),
                title: Some("docrag MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use rag_search to find passages and rag_ask for grounded answers. Call rag_index_new after adding documents."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Number of chunks to return (default: the top_k setting).
    pub top_k: Option<usize>,
    /// Diversify results with MMR (default: true).
    pub rerank: Option<bool>,
    /// MMR relevance weight between 0 and 1.
    pub lambda: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskParams {
    /// The question to answer.
    pub question: String,
    /// Number of chunks to retrieve as context.
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexParams {
    /// Directory to index (default: the documents directory).
    pub source: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

fn format_search_summary(hits: &[SearchHit], query: &str) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        hits.len(),
        suffix
    ));

    for hit in hits {
        lines.push(format!(
            "{:.3} {} page {}: {}",
            hit.score,
            hit.chunk.document_id,
            hit.chunk.page,
            search::preview(&hit.chunk.text, 120)
        ));
    }

    lines.join("\n")
}

fn structured_result(
    summary: String,
    structured: serde_json::Value,
) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(summary)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

fn stats_result(stats: &StoreStats) -> Result<CallToolResult, rmcp::ErrorData> {
    let structured = serde_json::to_value(stats)
        .map_err(|e| mcp_error("failed to serialize stats", e))?;
    let summary = format!(
        "{} document(s), {} chunk(s), {} vector(s)",
        stats.total_documents, stats.total_chunks, stats.total_vectors
    );
    Ok(structured_result(summary, structured))
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

fn invalid_params(
    message: &str,
    error: impl std::fmt::Display,
) -> rmcp::ErrorData {
    rmcp::ErrorData::invalid_params(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(
    data_dir: DataDir,
    config_db: ConfigDb,
    model_override: Option<&str>,
) -> error::Result<()> {
    let settings = Settings::resolve(&config_db)?;
    let model_id = resolve_model_id(model_override, &config_db)?;
    // Release the settings database so CLI commands can run alongside.
    drop(config_db);

    let indexer = Indexer::from_settings(data_dir.clone(), &settings)?;
    let generator = Arc::new(GeminiGenerator::new(
        settings.generation_model.clone(),
    )?);
    let state = RagState::new(
        data_dir,
        settings,
        indexer,
        Box::new(ModelManager::with_model_id(model_id)),
        generator,
    )?;

    let server = RagMcpServer::new(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
