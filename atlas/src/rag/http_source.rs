//! HTTP adapter for the retrieval service (`POST /api/search`).
//!
//! Thin by design: no retries here (retry policy belongs to the strategy
//! layer), just a bounded timeout and error classification into the RAG
//! taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::rag::source::canonical_identity;
use crate::rag::{RagError, RetrievalResult, RetrievalSource, SourceConfig};

/// Retrieval source backed by the retrieval service's search endpoint.
pub struct RetrievalServiceSource {
    client: reqwest::Client,
    url: String,
    default_pipeline: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    chunk_id: Option<i64>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: Option<f64>,
}

impl RetrievalServiceSource {
    pub fn new(config: &SourceConfig) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            default_pipeline: config.pipeline_name.clone(),
        })
    }
}

#[async_trait]
impl RetrievalSource for RetrievalServiceSource {
    async fn search(
        &self,
        query: &str,
        pipeline_name: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let pipeline = if pipeline_name.is_empty() || pipeline_name == "default" {
            self.default_pipeline.as_str()
        } else {
            pipeline_name
        };
        let url = format!("{}/api/search", self.url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query, "pipeline_name": pipeline }))
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "retrieval service request error");
                RagError::Network(e.to_string())
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            error!(url = %url, status = %status, "retrieval service error status");
            return Err(RagError::Remote {
                status: status.as_u16(),
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            error!(url = %url, error = %e, "retrieval service returned malformed body");
            RagError::Parse(e.to_string())
        })?;

        let results: Vec<RetrievalResult> = body
            .results
            .into_iter()
            .filter_map(|item| {
                let chunk_id = item.chunk_id?;
                if item.text.is_empty() {
                    return None;
                }
                Some(
                    RetrievalResult::new(chunk_id, item.text, item.score)
                        .with_metadata("source", json!("retrieval_service"))
                        .with_metadata("pipeline", json!(pipeline)),
                )
            })
            .collect();

        info!(
            query_len = query.len(),
            count = results.len(),
            "retrieval service search"
        );
        Ok(results)
    }

    fn identity(&self) -> String {
        canonical_identity(&self.url, &self.default_pipeline)
    }
}
