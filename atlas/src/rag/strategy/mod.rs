//! Retrieval strategies: policies composing one or more search calls.
//!
//! All strategies share a single source (multi-source fan-in is reserved),
//! dedup by `chunk_id` keeping the first occurrence, and read conversation
//! history for query shaping. The orchestrator picks the strategy from
//! [`crate::rag::StrategyKind`].

mod multi_round;
mod parallel;
mod single_round;

pub use multi_round::MultiRoundStrategy;
pub use parallel::ParallelStrategy;
pub use single_round::SingleRoundStrategy;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{Message, Role};
use crate::rag::{RagError, RetrievalResult, RetrievalSource};

/// A policy for composing search calls into a result set.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// Strategy name as used in cache keys and logs.
    fn name(&self) -> &'static str;

    /// Executes the strategy for one (possibly rewritten) query.
    async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
    ) -> Result<Vec<RetrievalResult>, RagError>;
}

/// Shared wiring for one strategy run: the source plus common knobs.
#[derive(Clone)]
pub struct StrategyContext {
    pub source: Arc<dyn RetrievalSource>,
    pub pipeline_name: String,
    pub top_k: usize,
}

/// Deduplicates by `chunk_id`, keeping the first occurrence.
pub(crate) fn dedup_by_chunk_id(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.chunk_id))
        .collect()
}

/// Last `n` user messages from the history, oldest first.
pub(crate) fn recent_user_messages(history: &[Message], n: usize) -> Vec<&str> {
    let mut users: Vec<&str> = history
        .iter()
        .rev()
        .filter(|m| m.role() == Role::User)
        .take(n)
        .map(|m| m.content())
        .collect();
    users.reverse();
    users
}

/// Char-safe prefix used when harvesting terms from content.
pub(crate) fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: k copies of a chunk_id collapse to one, first kept.
    #[test]
    fn dedup_keeps_first_occurrence() {
        let results = vec![
            RetrievalResult::new(1, "first", Some(0.5)),
            RetrievalResult::new(2, "two", Some(0.1)),
            RetrievalResult::new(1, "second", Some(0.01)),
            RetrievalResult::new(1, "third", None),
        ];
        let deduped = dedup_by_chunk_id(results);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, "first");
    }

    /// **Scenario**: recent_user_messages filters to users, oldest first.
    #[test]
    fn recent_user_messages_orders_oldest_first() {
        let history = vec![
            Message::user("one"),
            Message::assistant("a"),
            Message::user("two"),
            Message::user("three"),
        ];
        assert_eq!(recent_user_messages(&history, 2), vec!["two", "three"]);
        assert_eq!(
            recent_user_messages(&history, 10),
            vec!["one", "two", "three"]
        );
    }

    /// **Scenario**: char_prefix never splits multi-byte characters.
    #[test]
    fn char_prefix_is_boundary_safe() {
        assert_eq!(char_prefix("héllo wörld", 5), "héllo");
        assert_eq!(char_prefix("ab", 5), "ab");
    }
}
