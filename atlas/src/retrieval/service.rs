//! Retrieval pipeline execution: fan-out embed → vector search → dedup →
//! rerank → LLM filter.
//!
//! Embedder failures are isolated: a failing model contributes zero results
//! instead of aborting the pipeline. Only `chunk_id` and `text` leave the
//! service; scores stay internal. Debug mode carries every intermediate
//! stage plus per-stage wall-clock timings in milliseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::retrieval::{
    Embedder, LlmFilter, PipelineConfig, PipelineError, Reranker, VectorStore,
};

/// One chunk inside the pipeline: id, text, distance, and the embedder that
/// found it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub text: String,
    pub score: f64,
    pub embedder: String,
}

/// Externally visible chunk shape: id and text only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkOut {
    pub chunk_id: i64,
    pub text: String,
}

/// Intermediate stages and timings, returned in debug mode.
#[derive(Debug, Default, Serialize)]
pub struct DebugData {
    pub model_results: HashMap<String, Vec<ScoredChunk>>,
    pub deduplicated: Vec<ScoredChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranked: Option<Vec<ScoredChunk>>,
    pub final_chunks: Vec<ScoredChunk>,
    pub timing_ms: HashMap<String, f64>,
}

/// Response of one retrieval call.
#[derive(Debug, Serialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub results: Vec<ChunkOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugData>,
}

struct EmbedderSlot {
    key: String,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

/// The retrieval service for one pipeline.
pub struct RetrievalService {
    config: PipelineConfig,
    store: Arc<dyn VectorStore>,
    embedders: Vec<EmbedderSlot>,
    reranker: Option<Arc<dyn Reranker>>,
    llm_filter: Option<Arc<dyn LlmFilter>>,
}

impl RetrievalService {
    /// Builds the service from explicit components. `embedders` pairs each
    /// embedder key with its instance and collection; rerank/filter stages
    /// run only when both configured and supplied.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn VectorStore>,
        embedders: Vec<(String, Arc<dyn Embedder>, String)>,
        reranker: Option<Arc<dyn Reranker>>,
        llm_filter: Option<Arc<dyn LlmFilter>>,
    ) -> Result<Self, PipelineError> {
        if embedders.is_empty() {
            return Err(PipelineError::Config(
                "no embedders available for pipeline".into(),
            ));
        }
        Ok(Self {
            config,
            store,
            embedders: embedders
                .into_iter()
                .map(|(key, embedder, collection)| EmbedderSlot {
                    key,
                    embedder,
                    collection,
                })
                .collect(),
            reranker,
            llm_filter,
        })
    }

    /// Runs the retrieval pipeline for one query.
    pub async fn retrieve(
        &self,
        query: &str,
        return_debug: bool,
    ) -> Result<RetrievalResponse, PipelineError> {
        info!(query_len = query.len(), "starting retrieval");
        let mut timing: HashMap<String, f64> = HashMap::new();
        let start_total = Instant::now();

        // Fan-out: one embed + search task per configured model.
        let start_embed = Instant::now();
        let search_limit = self
            .config
            .chunk_sizes
            .initial_search
            .min(self.config.retrieval.top_k_per_model);
        let mut tasks: JoinSet<(String, Vec<ScoredChunk>, f64)> = JoinSet::new();
        for slot in &self.embedders {
            let key = slot.key.clone();
            let collection = slot.collection.clone();
            let embedder = Arc::clone(&slot.embedder);
            let store = Arc::clone(&self.store);
            let query = query.to_string();
            tasks.spawn(async move {
                let step_start = Instant::now();
                let chunks =
                    search_with_embedder(&query, &key, embedder, store, &collection, search_limit)
                        .await;
                (key, chunks, ms_since(step_start))
            });
        }

        let mut model_results: HashMap<String, Vec<ScoredChunk>> = HashMap::new();
        let mut combined: Vec<ScoredChunk> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, chunks, elapsed_ms)) => {
                    timing.insert(format!("embed_{key}"), elapsed_ms);
                    combined.extend(chunks.iter().cloned());
                    model_results.insert(key, chunks);
                }
                Err(e) => error!(error = %e, "embedder task panicked"),
            }
        }
        timing.insert("embedding_total".into(), ms_since(start_embed));

        // Dedup by chunk id, keeping the smaller distance.
        let start_dedup = Instant::now();
        let deduplicated = dedup_best_score(combined);
        timing.insert("deduplication".into(), ms_since(start_dedup));

        // Optional rerank.
        let mut reranked_debug: Option<Vec<ScoredChunk>> = None;
        let reranked = match (&self.reranker, self.config.rerank_enabled()) {
            (Some(reranker), true) => {
                let start = Instant::now();
                let input_len = self
                    .config
                    .chunk_sizes
                    .rerank_input
                    .min(self.config.retrieval.rerank_top_k)
                    .min(deduplicated.len());
                let reranked = reranker
                    .rerank(
                        query,
                        deduplicated[..input_len].to_vec(),
                        self.config.retrieval.rerank_top_k,
                    )
                    .await?;
                timing.insert("reranking".into(), ms_since(start));
                reranked_debug = Some(reranked.clone());
                reranked
            }
            _ => {
                info!("rerank disabled, skipping");
                deduplicated.clone()
            }
        };

        // Optional LLM filter.
        let final_chunks = match (&self.llm_filter, self.config.llm_filter_enabled()) {
            (Some(filter), true) => {
                let start = Instant::now();
                let input_len = self
                    .config
                    .chunk_sizes
                    .llm_filter_input
                    .min(reranked.len());
                let filtered = filter
                    .filter(
                        query,
                        reranked[..input_len].to_vec(),
                        self.config.retrieval.final_top_k,
                    )
                    .await?;
                timing.insert("llm_filtering".into(), ms_since(start));
                filtered
            }
            _ => {
                info!("llm filter disabled, using reranked results");
                reranked
            }
        };

        let results: Vec<ChunkOut> = final_chunks
            .iter()
            .map(|chunk| {
                if chunk.text.is_empty() {
                    warn!(chunk_id = chunk.chunk_id, "final chunk has no text");
                }
                ChunkOut {
                    chunk_id: chunk.chunk_id,
                    text: chunk.text.clone(),
                }
            })
            .collect();

        timing.insert("total".into(), ms_since(start_total));
        info!(
            final_count = results.len(),
            total_ms = timing.get("total").copied().unwrap_or_default(),
            "retrieval completed"
        );

        let debug = return_debug.then(|| DebugData {
            model_results,
            deduplicated,
            reranked: reranked_debug,
            final_chunks,
            timing_ms: timing,
        });

        Ok(RetrievalResponse {
            query: query.to_string(),
            results,
            debug,
        })
    }
}

/// Embeds and searches for one model; failures contribute zero results.
async fn search_with_embedder(
    query: &str,
    key: &str,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: &str,
    limit: usize,
) -> Vec<ScoredChunk> {
    let embeddings = match embedder.embed(&[query]).await {
        Ok(v) if !v.is_empty() => v,
        Ok(_) => {
            warn!(embedder = key, "no embedding generated");
            return Vec::new();
        }
        Err(e) => {
            error!(embedder = key, error = %e, "embedding failed");
            return Vec::new();
        }
    };

    let hit_lists = match store.search(&embeddings, limit, collection).await {
        Ok(lists) => lists,
        Err(e) => {
            error!(embedder = key, error = %e, "vector search failed");
            return Vec::new();
        }
    };

    let mut chunks = Vec::new();
    for hits in hit_lists {
        for hit in hits {
            if hit.text.is_empty() {
                warn!(chunk_id = hit.id, "hit has no text content");
            }
            chunks.push(ScoredChunk {
                chunk_id: hit.id,
                text: hit.text,
                score: hit.distance,
                embedder: key.to_string(),
            });
        }
    }
    info!(embedder = key, count = chunks.len(), "embedder search done");
    chunks
}

/// Deduplicates by chunk id, keeping the entry with the smaller distance.
fn dedup_best_score(chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut best: Vec<ScoredChunk> = Vec::with_capacity(chunks.len());
    let mut index_of: HashMap<i64, usize> = HashMap::new();
    for chunk in chunks {
        match index_of.get(&chunk.chunk_id) {
            None => {
                index_of.insert(chunk.chunk_id, best.len());
                best.push(chunk);
            }
            Some(&i) if chunk.score < best[i].score => best[i] = chunk,
            Some(_) => {}
        }
    }
    // Stable ascending order so downstream truncation picks the closest.
    best.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    best
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::InMemoryVectorStore;
    use async_trait::async_trait;

    /// Deterministic embedder: a fixed vector per known word.
    struct WordEmbedder {
        axis: usize,
    }

    #[async_trait]
    impl Embedder for WordEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts
                .iter()
                .map(|_| {
                    let mut v = vec![0.0f32; 3];
                    v[self.axis] = 1.0;
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Err(PipelineError::Embedding("model offline".into()))
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct PickFirstFilter;

    #[async_trait]
    impl LlmFilter for PickFirstFilter {
        async fn filter(
            &self,
            _query: &str,
            mut chunks: Vec<ScoredChunk>,
            top_k: usize,
        ) -> Result<Vec<ScoredChunk>, PipelineError> {
            chunks.truncate(top_k);
            Ok(chunks)
        }
    }

    fn store_with_chunks() -> Arc<InMemoryVectorStore> {
        let store = InMemoryVectorStore::new();
        store.insert("col_a", 1, "x-axis chunk", vec![1.0, 0.0, 0.0]);
        store.insert("col_a", 2, "y-ish chunk", vec![0.2, 0.9, 0.0]);
        store.insert("col_b", 1, "x-axis copy (closer)", vec![1.0, 0.05, 0.0]);
        store.insert("col_b", 3, "z chunk", vec![0.0, 0.0, 1.0]);
        Arc::new(store)
    }

    /// **Scenario**: two embedders fan out to their own collections; the
    /// duplicate chunk keeps the smaller distance; output is id+text only.
    #[tokio::test]
    async fn fan_out_dedups_best_score() {
        let service = RetrievalService::new(
            PipelineConfig::default(),
            store_with_chunks(),
            vec![
                ("model_x".into(), Arc::new(WordEmbedder { axis: 0 }), "col_a".into()),
                ("model_x2".into(), Arc::new(WordEmbedder { axis: 0 }), "col_b".into()),
            ],
            None,
            None,
        )
        .unwrap();

        let response = service.retrieve("anything", true).await.unwrap();
        let debug = response.debug.expect("debug requested");

        assert_eq!(debug.model_results.len(), 2);
        let ids: Vec<i64> = debug.deduplicated.iter().map(|c| c.chunk_id).collect();
        // Chunk 1 appears in both collections; kept once with the closer text.
        assert_eq!(ids.iter().filter(|id| **id == 1).count(), 1);
        let chunk1 = debug
            .deduplicated
            .iter()
            .find(|c| c.chunk_id == 1)
            .unwrap();
        assert_eq!(chunk1.text, "x-axis copy (closer)");

        assert!(response.results.iter().all(|r| !r.text.is_empty()));
        assert!(debug.timing_ms.contains_key("total"));
        assert!(debug.timing_ms.contains_key("embedding_total"));
    }

    /// **Scenario**: a failing embedder contributes zero results instead of
    /// aborting the pipeline.
    #[tokio::test]
    async fn failing_embedder_is_isolated() {
        let service = RetrievalService::new(
            PipelineConfig::default(),
            store_with_chunks(),
            vec![
                ("ok".into(), Arc::new(WordEmbedder { axis: 0 }), "col_a".into()),
                ("down".into(), Arc::new(FailingEmbedder), "col_a".into()),
            ],
            None,
            None,
        )
        .unwrap();

        let response = service.retrieve("q", true).await.unwrap();
        let debug = response.debug.expect("debug requested");
        assert!(debug.model_results["down"].is_empty());
        assert!(!debug.model_results["ok"].is_empty());
        assert!(!response.results.is_empty());
    }

    /// **Scenario**: the LLM filter stage runs only when config enables it,
    /// and caps output at final_top_k.
    #[tokio::test]
    async fn llm_filter_caps_results() {
        let mut config = PipelineConfig::default();
        config.llm_filter = Some(crate::retrieval::LlmFilterConfig {
            api_key: String::new(),
            base_url: String::new(),
            model: "filter-model".into(),
        });
        config.retrieval.final_top_k = 1;

        let service = RetrievalService::new(
            config,
            store_with_chunks(),
            vec![("m".into(), Arc::new(WordEmbedder { axis: 0 }), "col_a".into())],
            None,
            Some(Arc::new(PickFirstFilter)),
        )
        .unwrap();

        let response = service.retrieve("q", false).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.debug.is_none());
    }

    /// **Scenario**: no embedders is a configuration error.
    #[test]
    fn no_embedders_is_config_error() {
        let err = RetrievalService::new(
            PipelineConfig::default(),
            Arc::new(InMemoryVectorStore::new()),
            vec![],
            None,
            None,
        );
        assert!(matches!(err, Err(PipelineError::Config(_))));
    }
}
