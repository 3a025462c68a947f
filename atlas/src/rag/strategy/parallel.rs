//! Parallel strategy: concurrent searches over query variants.
//!
//! Variants combine the base query with key terms from recent user turns;
//! duplicates are removed before dispatch. Individual variant failures are
//! logged and dropped, never fatal, and the merged result set is
//! deduplicated by `chunk_id`.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::message::Message;
use crate::rag::strategy::{
    dedup_by_chunk_id, recent_user_messages, RetrievalStrategy, StrategyContext,
};
use crate::rag::{RagError, RetrievalResult};

const CONTEXT_HISTORY_TURNS: usize = 5;
const CONTEXT_WORDS_PER_TURN: usize = 5;

pub struct ParallelStrategy {
    ctx: StrategyContext,
    num_variants: usize,
}

impl ParallelStrategy {
    pub fn new(ctx: StrategyContext, num_variants: usize) -> Self {
        Self { ctx, num_variants }
    }

    /// Builds up to `num_variants` unique variants, base query first.
    fn generate_variants(&self, base_query: &str, history: &[Message]) -> Vec<String> {
        let mut context_terms: Vec<&str> = Vec::new();
        for content in recent_user_messages(history, CONTEXT_HISTORY_TURNS) {
            context_terms.extend(content.split_whitespace().take(CONTEXT_WORDS_PER_TURN));
        }

        let mut variants = vec![base_query.to_string()];
        for term in context_terms {
            if variants.len() >= self.num_variants {
                break;
            }
            let variant = format!("{} {}", base_query, term);
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
        variants
    }
}

#[async_trait]
impl RetrievalStrategy for ParallelStrategy {
    fn name(&self) -> &'static str {
        "parallel"
    }

    async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let variants = self.generate_variants(query, history);
        info!(variants = variants.len(), "parallel retrieval");

        let searches = variants.iter().map(|variant| {
            self.ctx
                .source
                .search(variant, &self.ctx.pipeline_name, self.ctx.top_k)
        });
        let outcomes = join_all(searches).await;

        let mut all_results = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(results) => all_results.extend(results),
                Err(e) => warn!(variant = i + 1, error = %e, "parallel variant failed"),
            }
        }

        let merged = dedup_by_chunk_id(all_results);
        info!(
            total = merged.len(),
            variants = variants.len(),
            "parallel retrieval done"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::strategy::testing::ScriptedSource;
    use std::sync::Arc;

    /// **Scenario**: variants are derived from user history and deduplicated;
    /// merged results dedup by chunk_id.
    #[tokio::test]
    async fn variants_from_history_merge_and_dedup() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![
                RetrievalResult::new(1, "a", Some(0.2)),
                RetrievalResult::new(2, "b", Some(0.3)),
            ]),
            Ok(vec![
                RetrievalResult::new(2, "b", Some(0.1)),
                RetrievalResult::new(3, "c", Some(0.4)),
            ]),
            Ok(vec![RetrievalResult::new(4, "d", Some(0.5))]),
        ]));
        let strategy = ParallelStrategy::new(
            StrategyContext {
                source: source.clone(),
                pipeline_name: "default".into(),
                top_k: 10,
            },
            3,
        );
        let history = vec![Message::user("hotels near the station in Kyoto")];

        let results = strategy.retrieve("cheap hotels", &history).await.unwrap();
        assert_eq!(results.len(), 4);

        let queries = source.seen_queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "cheap hotels");
        assert_eq!(queries[1], "cheap hotels hotels");
        assert_eq!(queries[2], "cheap hotels near");
    }

    /// **Scenario**: no history means a single base-query search.
    #[tokio::test]
    async fn no_history_single_variant() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![RetrievalResult::new(
            1,
            "a",
            None,
        )])]));
        let strategy = ParallelStrategy::new(
            StrategyContext {
                source: source.clone(),
                pipeline_name: "default".into(),
                top_k: 10,
            },
            3,
        );
        let results = strategy.retrieve("base", &[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(source.seen_queries(), vec!["base"]);
    }

    /// **Scenario**: one failing variant is dropped, the others survive.
    #[tokio::test]
    async fn failed_variant_is_dropped() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![RetrievalResult::new(1, "a", Some(0.2))]),
            Err(RagError::Network("refused".into())),
        ]));
        let strategy = ParallelStrategy::new(
            StrategyContext {
                source: source.clone(),
                pipeline_name: "default".into(),
                top_k: 10,
            },
            2,
        );
        let history = vec![Message::user("context words here")];
        let results = strategy.retrieve("q", &history).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
