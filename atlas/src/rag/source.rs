//! Retrieval source abstraction and result type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rag::RagError;

/// One retrieved chunk. Equality for dedup purposes is `chunk_id` only;
/// `score` is a distance (smaller is better) when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RetrievalResult {
    pub fn new(chunk_id: i64, text: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            chunk_id,
            text: text.into(),
            score,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A provider of retrieval results for one query.
///
/// Implementations: [`crate::rag::RetrievalServiceSource`] (HTTP) in
/// production, scripted sources in tests.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Runs one search. `top_k` is advisory; sources with their own limits
    /// may ignore it.
    async fn search(
        &self,
        query: &str,
        pipeline_name: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RagError>;

    /// Canonical identity used in cache keys: stable across config orderings
    /// and URL spelling variants of the same endpoint.
    fn identity(&self) -> String;
}

/// Canonicalizes a source identity: lowercase, no trailing slash on the URL
/// part, `url|pipeline` shape. Two configs naming the same endpoint in a
/// different case or with a trailing slash share cache entries.
pub(crate) fn canonical_identity(url: &str, pipeline: &str) -> String {
    format!(
        "{}|{}",
        url.trim_end_matches('/').to_lowercase(),
        pipeline.to_lowercase()
    )
}
