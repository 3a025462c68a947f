//! Multi-round strategy: iterated search with query refinement between rounds.
//!
//! Each round tags its results with the round number, merges into the
//! cumulative deduplicated set, and checks the stop conditions: enough
//! results, enough high-quality results (when a score threshold is set), or
//! a refinement that no longer changes the query.
//!
//! Refinement policy, driven by the previous round's results (scores are
//! distances, higher = less relevant):
//! - too few results → expansion: append recent user turns as extra context;
//! - high distances (avg > 0.5 and min > 0.3) → refinement: append leading
//!   terms from the best documents;
//! - otherwise → enhancement: a no-op hook, which terminates the loop via
//!   the unchanged-query condition.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::message::Message;
use crate::rag::strategy::{
    char_prefix, dedup_by_chunk_id, recent_user_messages, RetrievalStrategy, StrategyContext,
};
use crate::rag::{RagError, RetrievalResult};

const EXPANSION_HISTORY_TURNS: usize = 3;
const EXPANSION_CONTEXT_CHARS: usize = 100;
const REFINE_DOCS: usize = 3;
const REFINE_DOC_CHARS: usize = 200;
const REFINE_WORDS_PER_DOC: usize = 5;
const REFINE_MAX_TERMS: usize = 5;
/// Below this many results the previous round counts as "too few".
const SPARSE_RESULT_COUNT: usize = 3;
const HIGH_AVG_DISTANCE: f64 = 0.5;
const HIGH_MIN_DISTANCE: f64 = 0.3;

pub struct MultiRoundStrategy {
    ctx: StrategyContext,
    max_rounds: usize,
    min_results_threshold: usize,
    min_score_threshold: Option<f64>,
}

impl MultiRoundStrategy {
    pub fn new(
        ctx: StrategyContext,
        max_rounds: usize,
        min_results_threshold: usize,
        min_score_threshold: Option<f64>,
    ) -> Self {
        Self {
            ctx,
            max_rounds,
            min_results_threshold,
            min_score_threshold,
        }
    }

    /// Picks the next query from the previous round's outcome.
    fn refine_query(
        &self,
        original_query: &str,
        previous: &[RetrievalResult],
        history: &[Message],
    ) -> String {
        let scores: Vec<f64> = previous.iter().filter_map(|r| r.score).collect();
        if previous.is_empty() || scores.is_empty() || previous.len() < SPARSE_RESULT_COUNT {
            return expand_query(original_query, history);
        }

        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        if avg > HIGH_AVG_DISTANCE && min > HIGH_MIN_DISTANCE {
            return refine_with_terms(original_query, previous);
        }

        // Results look good; the enhancement hook keeps the query as-is,
        // which stops the loop through the unchanged-query condition.
        original_query.to_string()
    }
}

/// Expansion: append recent user turns as extra context.
fn expand_query(query: &str, history: &[Message]) -> String {
    let recent: Vec<&str> = recent_user_messages(history, EXPANSION_HISTORY_TURNS)
        .into_iter()
        .map(|c| char_prefix(c, EXPANSION_CONTEXT_CHARS))
        .collect();
    if recent.is_empty() {
        return query.to_string();
    }
    format!("{} {}", query, recent.join(" "))
}

/// Refinement: append leading terms from the best-scoring documents.
fn refine_with_terms(query: &str, results: &[RetrievalResult]) -> String {
    let mut best: Vec<&RetrievalResult> = results.iter().collect();
    best.sort_by(|a, b| {
        let sa = a.score.unwrap_or(f64::INFINITY);
        let sb = b.score.unwrap_or(f64::INFINITY);
        sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut terms: Vec<&str> = Vec::new();
    for result in best.iter().take(REFINE_DOCS) {
        let text = char_prefix(&result.text, REFINE_DOC_CHARS);
        for word in text.split_whitespace().take(REFINE_WORDS_PER_DOC) {
            if !terms.contains(&word) {
                terms.push(word);
            }
            if terms.len() >= REFINE_MAX_TERMS {
                break;
            }
        }
        if terms.len() >= REFINE_MAX_TERMS {
            break;
        }
    }

    if terms.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, terms.join(" "))
    }
}

#[async_trait]
impl RetrievalStrategy for MultiRoundStrategy {
    fn name(&self) -> &'static str {
        "multi_round"
    }

    async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let mut all_results: Vec<RetrievalResult> = Vec::new();
        let mut current_query = query.to_string();

        for round in 1..=self.max_rounds {
            info!(round, max_rounds = self.max_rounds, "multi-round search");
            let mut round_results = self
                .ctx
                .source
                .search(&current_query, &self.ctx.pipeline_name, self.ctx.top_k)
                .await?;
            for result in &mut round_results {
                result.metadata.insert("round".into(), json!(round));
            }

            all_results.extend(round_results.iter().cloned());
            all_results = dedup_by_chunk_id(all_results);

            if all_results.len() >= self.min_results_threshold {
                info!(round, count = all_results.len(), "enough results, stopping");
                break;
            }
            if let Some(threshold) = self.min_score_threshold {
                let good = round_results
                    .iter()
                    .filter(|r| r.score.map(|s| s <= threshold).unwrap_or(false))
                    .count();
                if good >= self.min_results_threshold {
                    info!(round, good, "enough high-quality results, stopping");
                    break;
                }
            }

            if round < self.max_rounds {
                let refined = self.refine_query(query, &round_results, history);
                if refined == current_query {
                    info!(round, "no further refinement possible, stopping");
                    break;
                }
                info!(round, "query refined for next round");
                current_query = refined;
            }
        }

        info!(total = all_results.len(), "multi-round retrieval done");
        Ok(all_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::strategy::testing::ScriptedSource;
    use std::sync::Arc;

    fn strategy(
        source: Arc<ScriptedSource>,
        max_rounds: usize,
        min_results: usize,
    ) -> MultiRoundStrategy {
        MultiRoundStrategy::new(
            StrategyContext {
                source,
                pipeline_name: "default".into(),
                top_k: 10,
            },
            max_rounds,
            min_results,
            None,
        )
    }

    /// **Scenario**: a sparse first round expands with history, a
    /// high-distance second round refines with document terms, and the loop
    /// runs to the cap; the cumulative set is deduplicated across rounds.
    #[tokio::test]
    async fn runs_all_rounds_when_threshold_not_met() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![RetrievalResult::new(1, "alpha doc", Some(0.8))]),
            Ok(vec![
                RetrievalResult::new(1, "alpha doc", Some(0.7)),
                RetrievalResult::new(2, "osaka castle hours", Some(0.9)),
                RetrievalResult::new(3, "nara deer park", Some(0.8)),
            ]),
            Ok(vec![RetrievalResult::new(4, "delta doc", Some(0.4))]),
        ]));
        let history = vec![
            Message::user("I am planning a trip to Japan"),
            Message::assistant("Great!"),
            Message::user("what about visas"),
        ];
        // Threshold 5 is never reached within 3 rounds.
        let results = strategy(source.clone(), 3, 5)
            .retrieve("visa requirements", &history)
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        let queries = source.seen_queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "visa requirements");
        // Round 1 returned one result: expansion appends recent user turns.
        assert!(queries[1].starts_with("visa requirements "));
        assert!(queries[1].contains("Japan"));
        // Round 2 had three high-distance results: refinement appends
        // leading terms from the best documents.
        assert!(queries[2].starts_with("visa requirements "));
        assert!(queries[2].contains("alpha"));
        assert_ne!(queries[2], queries[1]);
        // Round metadata survives the cross-round dedup (first seen wins).
        assert_eq!(results[0].metadata["round"], 1);
        assert_eq!(results[1].metadata["round"], 2);
        assert_eq!(results[3].metadata["round"], 3);
    }

    /// **Scenario**: the count threshold stops the loop early.
    #[tokio::test]
    async fn stops_when_threshold_met() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            RetrievalResult::new(1, "a", Some(0.1)),
            RetrievalResult::new(2, "b", Some(0.1)),
            RetrievalResult::new(3, "c", Some(0.2)),
        ])]));
        let results = strategy(source.clone(), 3, 3)
            .retrieve("query", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(source.seen_queries().len(), 1);
    }

    /// **Scenario**: empty round with empty history cannot expand, so the
    /// unchanged query stops the loop.
    #[tokio::test]
    async fn unchanged_refinement_stops_loop() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![])]));
        let results = strategy(source.clone(), 3, 3)
            .retrieve("query", &[])
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(source.seen_queries().len(), 1);
    }

    /// **Scenario**: high-distance rounds refine with document terms.
    #[tokio::test]
    async fn high_distance_results_refine_with_terms() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![
                RetrievalResult::new(1, "tokyo subway pass fares", Some(0.9)),
                RetrievalResult::new(2, "osaka rail", Some(0.8)),
                RetrievalResult::new(3, "kyoto bus", Some(0.7)),
            ]),
            Ok(vec![RetrievalResult::new(4, "d", Some(0.2))]),
        ]));
        let results = strategy(source.clone(), 2, 10)
            .retrieve("transport costs", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        let queries = source.seen_queries();
        assert!(queries[1].starts_with("transport costs "));
        assert!(queries[1].contains("kyoto"));
    }

    /// **Scenario**: the quality threshold stops when enough low-distance
    /// results arrive in one round.
    #[tokio::test]
    async fn score_threshold_stops_early() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            RetrievalResult::new(1, "a", Some(0.05)),
            RetrievalResult::new(2, "b", Some(0.08)),
        ])]));
        let strategy = MultiRoundStrategy::new(
            StrategyContext {
                source: source.clone(),
                pipeline_name: "default".into(),
                top_k: 10,
            },
            3,
            2,
            Some(0.1),
        );
        // Count threshold (2) already satisfied by round 1; score threshold
        // also satisfied. One round total.
        let results = strategy.retrieve("q", &[]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(source.seen_queries().len(), 1);
    }
}
