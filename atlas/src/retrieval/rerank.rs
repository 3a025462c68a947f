//! Cross-encoder rerank stage over an HTTP rerank endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::retrieval::{PipelineError, RerankConfig, ScoredChunk};

/// Reorders candidate chunks by relevance to the query.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;
}

/// HTTP reranker: POST `{model, query, documents}` → scored indices.
pub struct HttpReranker {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankItem>,
}

#[derive(Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f64,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        if chunks.is_empty() {
            return Ok(chunks);
        }
        let documents: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": documents,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Rerank(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PipelineError::Rerank(format!(
                "rerank endpoint returned status {status}"
            )));
        }
        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Rerank(e.to_string()))?;

        let mut scored: Vec<RerankItem> = body
            .results
            .into_iter()
            .filter(|item| item.index < chunks.len())
            .collect();
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let reranked: Vec<ScoredChunk> = scored
            .into_iter()
            .take(top_k)
            .map(|item| {
                let mut chunk = chunks[item.index].clone();
                // Reranker scores are similarities; store as distance so the
                // rest of the pipeline keeps one ordering convention.
                chunk.score = 1.0 - item.relevance_score;
                chunk
            })
            .collect();
        info!(input = documents.len(), output = reranked.len(), "reranked");
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn chunk(id: i64, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id,
            text: text.to_string(),
            score: 0.5,
            embedder: "test".into(),
        }
    }

    /// **Scenario**: rerank reorders by relevance and truncates to top_k.
    #[tokio::test]
    async fn reranks_and_truncates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap();
            let body = r#"{"results":[{"index":0,"relevance_score":0.2},{"index":1,"relevance_score":0.9},{"index":2,"relevance_score":0.5}]}"#;
            let resp = format!(
                "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(resp.as_bytes()).await.unwrap();
        });

        let reranker = HttpReranker::new(&RerankConfig {
            api_url: format!("http://{}/rerank", addr),
            model: "test-rerank".into(),
            timeout: 5,
        })
        .unwrap();

        let out = reranker
            .rerank("q", vec![chunk(1, "a"), chunk(2, "b"), chunk(3, "c")], 2)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, 2);
        assert_eq!(out[1].chunk_id, 3);
        assert!(out[0].score < out[1].score, "similarity folds into distance");
        server.await.unwrap();
    }

    /// **Scenario**: empty candidate list short-circuits without a request.
    #[tokio::test]
    async fn empty_input_short_circuits() {
        let reranker = HttpReranker::new(&RerankConfig {
            api_url: "http://127.0.0.1:1/rerank".into(),
            model: "m".into(),
            timeout: 1,
        })
        .unwrap();
        assert!(reranker.rerank("q", vec![], 5).await.unwrap().is_empty());
    }

    /// **Scenario**: unreachable endpoint surfaces a rerank error.
    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let reranker = HttpReranker::new(&RerankConfig {
            api_url: "http://127.0.0.1:1/rerank".into(),
            model: "m".into(),
            timeout: 1,
        })
        .unwrap();
        let err = reranker.rerank("q", vec![chunk(1, "a")], 5).await;
        assert!(matches!(err, Err(PipelineError::Rerank(_))));
    }
}
