//! Single-round strategy: one search, straight pass-through.

use async_trait::async_trait;
use tracing::info;

use crate::message::Message;
use crate::rag::strategy::{RetrievalStrategy, StrategyContext};
use crate::rag::{RagError, RetrievalResult};

const DEFAULT_TOP_K: usize = 10;

pub struct SingleRoundStrategy {
    ctx: StrategyContext,
}

impl SingleRoundStrategy {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RetrievalStrategy for SingleRoundStrategy {
    fn name(&self) -> &'static str {
        "single_round"
    }

    async fn retrieve(
        &self,
        query: &str,
        _history: &[Message],
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let top_k = self.ctx.top_k.min(DEFAULT_TOP_K);
        let results = self
            .ctx
            .source
            .search(query, &self.ctx.pipeline_name, top_k)
            .await?;
        info!(count = results.len(), "single round retrieval");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::strategy::testing::ScriptedSource;
    use std::sync::Arc;

    /// **Scenario**: one search, results passed through unchanged.
    #[tokio::test]
    async fn passes_results_through() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            RetrievalResult::new(1, "a", Some(0.1)),
            RetrievalResult::new(2, "b", Some(0.2)),
        ])]));
        let strategy = SingleRoundStrategy::new(StrategyContext {
            source: source.clone(),
            pipeline_name: "default".into(),
            top_k: 10,
        });

        let results = strategy.retrieve("query", &[]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(source.seen_queries(), vec!["query"]);
    }

    /// **Scenario**: source failure propagates (no retry at this layer).
    #[tokio::test]
    async fn source_failure_propagates() {
        let source = Arc::new(ScriptedSource::new(vec![Err(RagError::Network(
            "refused".into(),
        ))]));
        let strategy = SingleRoundStrategy::new(StrategyContext {
            source,
            pipeline_name: "default".into(),
            top_k: 10,
        });
        assert!(matches!(
            strategy.retrieve("query", &[]).await,
            Err(RagError::Network(_))
        ));
    }
}
