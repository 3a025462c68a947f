//! Result processor: merge, rank, truncate.

use std::collections::HashMap;

use crate::rag::{ProcessorConfig, RetrievalResult};

/// Final shaping of a strategy's result set: per-chunk merge (optionally
/// keeping the best score), ascending-distance sort, truncation.
pub struct ResultProcessor {
    max_results: usize,
    merge_keep_best_score: bool,
}

impl ResultProcessor {
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            max_results: config.max_results,
            merge_keep_best_score: config.merge_keep_best_score,
        }
    }

    pub fn process(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let mut merged: Vec<RetrievalResult> = Vec::with_capacity(results.len());
        let mut index_of: HashMap<i64, usize> = HashMap::new();

        for result in results {
            match index_of.get(&result.chunk_id) {
                None => {
                    index_of.insert(result.chunk_id, merged.len());
                    merged.push(result);
                }
                Some(&i) if self.merge_keep_best_score => {
                    let existing = merged[i].score.unwrap_or(f64::INFINITY);
                    let candidate = result.score.unwrap_or(f64::INFINITY);
                    if candidate < existing {
                        merged[i] = result;
                    }
                }
                Some(_) => {}
            }
        }

        // Ascending distance; unscored entries sort last.
        merged.sort_by(|a, b| {
            let sa = a.score.unwrap_or(f64::INFINITY);
            let sb = b.score.unwrap_or(f64::INFINITY);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(self.max_results);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(max_results: usize, merge_best: bool) -> ResultProcessor {
        ResultProcessor::from_config(&ProcessorConfig {
            max_results,
            merge_keep_best_score: merge_best,
        })
    }

    /// **Scenario**: duplicates merge keeping the smallest distance; output
    /// sorts ascending and truncates.
    #[test]
    fn merges_best_score_sorts_and_truncates() {
        let results = vec![
            RetrievalResult::new(1, "worse copy", Some(0.8)),
            RetrievalResult::new(2, "mid", Some(0.4)),
            RetrievalResult::new(1, "better copy", Some(0.2)),
            RetrievalResult::new(3, "best", Some(0.1)),
        ];
        let out = processor(2, true).process(results);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, 3);
        assert_eq!(out[1].chunk_id, 1);
        assert_eq!(out[1].text, "better copy");
    }

    /// **Scenario**: without best-score merging the first occurrence wins.
    #[test]
    fn merge_disabled_keeps_first() {
        let results = vec![
            RetrievalResult::new(1, "first", Some(0.8)),
            RetrievalResult::new(1, "second", Some(0.1)),
        ];
        let out = processor(10, false).process(results);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "first");
    }

    /// **Scenario**: unscored entries sort after every scored one.
    #[test]
    fn unscored_sorts_last() {
        let results = vec![
            RetrievalResult::new(1, "unscored", None),
            RetrievalResult::new(2, "scored", Some(0.9)),
        ];
        let out = processor(10, true).process(results);
        assert_eq!(out[0].chunk_id, 2);
        assert_eq!(out[1].chunk_id, 1);
    }
}
