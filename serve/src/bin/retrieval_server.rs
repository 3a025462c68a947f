//! Retrieval service binary.
//!
//! Env: `PIPELINES_CONFIG_PATH` (default `pipelines.yaml`),
//! `RETRIEVAL_ADDR`, provider API keys for embeddings and the LLM filter.
//! Runs over the in-memory vector store; production deployments construct
//! [`serve::RetrievalState`] with their own store adapter.

use std::sync::Arc;

use atlas::retrieval::PipelineConfigManager;
use serve::RetrievalState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = config::load_and_apply("atlas", None);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let pipelines_path = std::env::var("PIPELINES_CONFIG_PATH")
        .unwrap_or_else(|_| "pipelines.yaml".to_string());
    let manager = Arc::new(PipelineConfigManager::new(pipelines_path));
    let state = Arc::new(RetrievalState::in_memory(manager));

    let addr = std::env::var("RETRIEVAL_ADDR").ok();
    serve::run_retrieval_serve(addr.as_deref(), state).await
}
