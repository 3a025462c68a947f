//! Retrieval service core.
//!
//! Given a configured pipeline and a query: embed the query with every
//! configured embedding model in parallel (each model pinned to one
//! collection), search the vector store per model, deduplicate by chunk id
//! keeping the best distance, then optionally rerank and LLM-filter before
//! returning `{chunk_id, text}` pairs. Debug mode exposes every stage plus
//! per-stage timings.
//!
//! The vector store is the narrow [`VectorStore`] contract only; the
//! in-memory implementation serves tests and local runs, the production
//! Milvus adapter is an external collaborator.

mod config;
mod embedder;
mod llm_filter;
mod rerank;
mod service;
mod vector_store;

pub use config::{
    ChunkSizes, EmbedderId, EmbeddingModelConfig, LlmFilterConfig, MilvusConfig, PipelineConfig,
    PipelineConfigManager, PipelinesFile, RerankConfig, RetrievalParams,
};
pub use embedder::{Embedder, OpenAIEmbedder};
pub use llm_filter::{ChatLlmFilter, LlmFilter};
pub use rerank::{HttpReranker, Reranker};
pub use service::{ChunkOut, DebugData, RetrievalResponse, RetrievalService, ScoredChunk};
pub use vector_store::{InMemoryVectorStore, SearchHit, VectorStore};

use thiserror::Error;

/// Errors from the retrieval pipeline and its configuration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
    #[error("pipeline '{0}' not found")]
    UnknownPipeline(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector store error: {0}")]
    Store(String),
    #[error("rerank failed: {0}")]
    Rerank(String),
    #[error("llm filter failed: {0}")]
    Filter(String),
    #[error("read pipelines file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse pipelines file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
