//! Retrieval-augmented generation engine.
//!
//! The [`RagOrchestrator`] wires the pipeline for one retrieval request:
//! input guardrail → cache lookup → query rewrite → strategy execution →
//! result processing → output guardrail → cache write. Strategies
//! ([`strategy`]) compose one or more searches against a
//! [`RetrievalSource`]; the HTTP source talks to the retrieval service.
//!
//! Failure policy: with `fallback_on_error` the pipeline degrades to the
//! best partial result (strategy failure becomes an explicit empty-results
//! response tagged `source: "rag_system"`), so one flaky dependency never
//! breaks the chat turn.

mod cache;
mod config;
mod guardrail;
mod http_source;
mod orchestrator;
mod processor;
mod rewriter;
mod source;
pub mod strategy;

pub use cache::RagCache;
pub use config::{
    CacheConfig, InputGuardrailConfig, OutputGuardrailConfig, ProcessorConfig, RagConfig,
    RewriterConfig, SourceConfig, StrategyKind,
};
pub use guardrail::{InputGuardrail, OutputGuardrail};
pub use http_source::RetrievalServiceSource;
pub use orchestrator::{RagOrchestrator, RagResponse};
pub use processor::ResultProcessor;
pub use rewriter::QueryRewriter;
pub use source::{RetrievalResult, RetrievalSource};

use thiserror::Error;

/// Errors from the RAG pipeline and its sources.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval source unreachable: {0}")]
    Network(String),
    #[error("retrieval source returned status {status}")]
    Remote { status: u16 },
    #[error("failed to parse retrieval response: {0}")]
    Parse(String),
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("invalid rag configuration: {0}")]
    Config(String),
    #[error("no enabled retrieval source configured")]
    NoSource,
    #[error("retrieval strategy failed: {0}")]
    Strategy(String),
}
