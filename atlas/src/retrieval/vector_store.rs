//! Narrow vector-store contract and the in-memory implementation.
//!
//! The retrieval core only needs `search(vectors, limit, collection)`;
//! everything else about the production store (schema, indexing, ingestion)
//! belongs to the knowledge-base builder. [`InMemoryVectorStore`] implements
//! the contract over cosine distance for tests and local runs.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::retrieval::PipelineError;

/// One hit from a vector search. `distance` is smaller-is-better.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub distance: f64,
    pub text: String,
}

/// The search contract the retrieval core consumes.
///
/// `vectors` may hold several query vectors; the result has one hit list per
/// query vector, each at most `limit` long and ordered by ascending distance.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        vectors: &[Vec<f32>],
        limit: usize,
        collection: &str,
    ) -> Result<Vec<Vec<SearchHit>>, PipelineError>;
}

#[derive(Clone)]
struct StoredChunk {
    id: i64,
    text: String,
    vector: Vec<f32>,
}

/// In-memory store keyed by collection, cosine-distance search.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: DashMap<String, Vec<StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one chunk into a collection (replacing any chunk with the
    /// same id).
    pub fn insert(&self, collection: &str, id: i64, text: impl Into<String>, vector: Vec<f32>) {
        let mut chunks = self.collections.entry(collection.to_string()).or_default();
        chunks.retain(|c| c.id != id);
        chunks.push(StoredChunk {
            id,
            text: text.into(),
            vector,
        });
    }

    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - (dot / (norm_a * norm_b)) as f64
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        vectors: &[Vec<f32>],
        limit: usize,
        collection: &str,
    ) -> Result<Vec<Vec<SearchHit>>, PipelineError> {
        let chunks = self
            .collections
            .get(collection)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(vectors.len());
        for vector in vectors {
            let mut hits: Vec<SearchHit> = chunks
                .iter()
                .map(|chunk| SearchHit {
                    id: chunk.id,
                    distance: Self::cosine_distance(vector, &chunk.vector),
                    text: chunk.text.clone(),
                })
                .collect();
            hits.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(limit);
            out.push(hits);
        }
        Ok(out)
    }
}
