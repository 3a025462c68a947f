//! Retrieval service endpoints: `/api/search` and liveness.

use std::sync::Arc;

use atlas::retrieval::{
    ChatLlmFilter, Embedder, HttpReranker, InMemoryVectorStore, LlmFilter, OpenAIEmbedder,
    PipelineConfig, PipelineConfigManager, PipelineError, Reranker, RetrievalService, VectorStore,
};
use atlas::ChatOpenAI;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::response::error_response;

/// Shared state of the retrieval service.
pub struct RetrievalState {
    pub manager: Arc<PipelineConfigManager>,
    pub store: Arc<dyn VectorStore>,
}

impl RetrievalState {
    /// State over the in-memory store (local runs and tests); production
    /// deployments inject their vector-store adapter instead.
    pub fn in_memory(manager: Arc<PipelineConfigManager>) -> Self {
        Self {
            manager,
            store: Arc::new(InMemoryVectorStore::new()),
        }
    }
}

/// Routes of the retrieval service.
pub fn retrieval_router(state: Arc<RetrievalState>) -> Router {
    Router::new()
        .route("/api/search", post(search))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    pipeline_name: Option<String>,
    #[serde(default)]
    debug: bool,
}

/// POST /api/search — run the pipeline for one query.
async fn search(
    State(state): State<Arc<RetrievalState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<atlas::retrieval::RetrievalResponse>, Response> {
    if request.query.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "query must not be empty"));
    }

    let pipeline = state
        .manager
        .get_pipeline(request.pipeline_name.as_deref())
        .map_err(|e| match e {
            PipelineError::UnknownPipeline(name) => {
                error_response(StatusCode::NOT_FOUND, format!("unknown pipeline: {name}"))
            }
            other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    let service = build_retrieval_service(&pipeline, Arc::clone(&state.store))
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let response = service
        .retrieve(&request.query, request.debug)
        .await
        .map_err(|e| error_response(StatusCode::BAD_GATEWAY, e.to_string()))?;

    info!(results = response.results.len(), "search served");
    Ok(Json(response))
}

/// Assembles a [`RetrievalService`] for one pipeline config: embedders from
/// the typed model list, optional rerank and LLM-filter stages.
pub fn build_retrieval_service(
    config: &PipelineConfig,
    store: Arc<dyn VectorStore>,
) -> Result<RetrievalService, PipelineError> {
    let mut embedders: Vec<(String, Arc<dyn Embedder>, String)> = Vec::new();
    for model in config.embedding_model_configs() {
        // Every known provider speaks the OpenAI-compatible embeddings wire;
        // the base URL and key come from the provider's env family.
        let embedder: Arc<dyn Embedder> = match model.id.provider.as_str() {
            "openai" | "qwen" | "bge" => Arc::new(OpenAIEmbedder::new(
                model
                    .id
                    .model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            )),
            other => {
                warn!(provider = other, "unknown embedding provider, skipping");
                continue;
            }
        };
        embedders.push((model.id.key(), embedder, model.collection.clone()));
    }

    let reranker: Option<Arc<dyn Reranker>> = match (&config.rerank, config.rerank_enabled()) {
        (Some(rerank), true) => Some(Arc::new(HttpReranker::new(rerank)?)),
        _ => None,
    };
    let llm_filter: Option<Arc<dyn LlmFilter>> =
        match (&config.llm_filter, config.llm_filter_enabled()) {
            (Some(filter), true) => {
                let model = if filter.model.trim().is_empty() {
                    "gpt-4o-mini"
                } else {
                    filter.model.as_str()
                };
                Some(Arc::new(ChatLlmFilter::new(Arc::new(ChatOpenAI::new(model)))))
            }
            _ => None,
        };

    RetrievalService::new(config.clone(), store, embedders, reranker, llm_filter)
}
