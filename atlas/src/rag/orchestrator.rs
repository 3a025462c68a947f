//! RAG orchestrator: the pipeline for one retrieval request.
//!
//! guardrail (input) → cache lookup → query rewrite → strategy → result
//! processor → guardrail (output) → cache write. Validation rejections
//! always propagate (the caller misused the API); infrastructure failures
//! degrade to an explicit empty-results response when `fallback_on_error`
//! is set.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::llm::LlmClient;
use crate::message::Message;
use crate::rag::strategy::{
    MultiRoundStrategy, ParallelStrategy, RetrievalStrategy, SingleRoundStrategy, StrategyContext,
};
use crate::rag::{
    InputGuardrail, OutputGuardrail, QueryRewriter, RagCache, RagConfig, RagError,
    ResultProcessor, RetrievalResult, RetrievalServiceSource, RetrievalSource, StrategyKind,
};

/// Response of one retrieval request.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub query: String,
    pub results: Vec<RetrievalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RagResponse {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            results: Vec::new(),
            rewritten_query: None,
            cached: false,
            error: None,
            source: None,
        }
    }
}

pub struct RagOrchestrator {
    config: RagConfig,
    sources: Vec<Arc<dyn RetrievalSource>>,
    strategy: Arc<dyn RetrievalStrategy>,
    rewriter: QueryRewriter,
    cache: Option<RagCache>,
    input_guardrail: InputGuardrail,
    output_guardrail: OutputGuardrail,
    processor: ResultProcessor,
}

impl RagOrchestrator {
    /// Builds the orchestrator from config, constructing HTTP sources for
    /// every enabled source entry.
    pub fn new(config: RagConfig, llm: Option<Arc<dyn LlmClient>>) -> Result<Self, RagError> {
        let sources: Vec<Arc<dyn RetrievalSource>> = config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| {
                RetrievalServiceSource::new(s).map(|src| Arc::new(src) as Arc<dyn RetrievalSource>)
            })
            .collect::<Result<_, _>>()?;
        Self::assemble(config, sources, llm)
    }

    /// Builds the orchestrator over explicit sources (tests, custom wiring).
    pub fn with_sources(
        config: RagConfig,
        sources: Vec<Arc<dyn RetrievalSource>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self, RagError> {
        Self::assemble(config, sources, llm)
    }

    fn assemble(
        config: RagConfig,
        sources: Vec<Arc<dyn RetrievalSource>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self, RagError> {
        let strategy = build_strategy(&config, sources.first().cloned())?;
        let rewriter = QueryRewriter::new(llm, config.query_rewriter.enabled);
        let cache = config.cache.enabled.then(|| {
            RagCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_entries,
            )
        });
        let input_guardrail = InputGuardrail::from_config(&config.input_guardrail)?;
        let output_guardrail = OutputGuardrail::from_config(&config.output_guardrail)?;
        let processor = ResultProcessor::from_config(&config.processor);
        Ok(Self {
            config,
            sources,
            strategy,
            rewriter,
            cache,
            input_guardrail,
            output_guardrail,
            processor,
        })
    }

    /// Runs the full pipeline for one query.
    pub async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
    ) -> Result<RagResponse, RagError> {
        if !self.config.enabled {
            return Ok(RagResponse::empty(query));
        }

        // 1. Input guardrail. Rejections are the caller's problem and always
        //    propagate; fallback_on_error covers infrastructure, not misuse.
        let check = self.input_guardrail.check(query)?;
        if check.sensitive {
            info!("sensitive query entering retrieval");
        }

        // 2. Cache lookup, keyed on the incoming query.
        let identities: Vec<String> = self.sources.iter().map(|s| s.identity()).collect();
        let key = RagCache::key(query, self.strategy.name(), &identities);
        if let Some(cache) = &self.cache {
            if let Some(results) = cache.get(key) {
                info!(count = results.len(), "rag cache hit");
                return Ok(RagResponse {
                    cached: true,
                    results,
                    ..RagResponse::empty(query)
                });
            }
        }

        // 3. Query rewrite (best-effort, falls back internally).
        let rewritten = self.rewriter.rewrite(query, history).await;

        // 4. Strategy execution.
        let raw = match self.strategy.retrieve(&rewritten, history).await {
            Ok(results) => results,
            Err(e) if self.config.fallback_on_error => {
                error!(error = %e, "retrieval strategy failed, returning empty fallback");
                return Ok(RagResponse {
                    error: Some(e.to_string()),
                    source: Some("rag_system".to_string()),
                    ..RagResponse::empty(query)
                });
            }
            Err(e) => return Err(e),
        };

        // 5–6. Processing and output guardrail.
        let processed = self.processor.process(raw);
        let results = self.output_guardrail.apply(processed);

        // 7. Cache write.
        if let Some(cache) = &self.cache {
            cache.put(key, results.clone());
        }

        if results.is_empty() {
            warn!("rag pipeline produced no results");
        }
        Ok(RagResponse {
            results,
            rewritten_query: (rewritten != query).then_some(rewritten),
            ..RagResponse::empty(query)
        })
    }
}

fn build_strategy(
    config: &RagConfig,
    source: Option<Arc<dyn RetrievalSource>>,
) -> Result<Arc<dyn RetrievalStrategy>, RagError> {
    let source = source.ok_or(RagError::NoSource)?;
    let pipeline_name = config
        .sources
        .first()
        .map(|s| s.pipeline_name.clone())
        .unwrap_or_else(|| "default".to_string());
    let ctx = StrategyContext {
        source,
        pipeline_name,
        top_k: config.top_k,
    };
    Ok(match config.strategy {
        StrategyKind::SingleRound => Arc::new(SingleRoundStrategy::new(ctx)),
        StrategyKind::MultiRound => Arc::new(MultiRoundStrategy::new(
            ctx,
            config.max_rounds,
            config.min_results_threshold,
            config.min_score_threshold,
        )),
        StrategyKind::Parallel => Arc::new(ParallelStrategy::new(ctx, config.num_variants)),
    })
}
