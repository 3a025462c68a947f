//! LLM filter: final culling pass choosing the most relevant chunks.
//!
//! The filter asks the LLM to pick up to `top_k` chunk ids from a numbered
//! candidate list. A malformed or empty reply degrades to truncating the
//! candidates, never to an error: by this stage the pipeline has useful
//! results and should not lose them to a flaky filter model.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm::{CompletionOptions, LlmClient};
use crate::message::Message;
use crate::retrieval::{PipelineError, ScoredChunk};

const CHUNK_PREVIEW_CHARS: usize = 600;

/// Chooses the most relevant `k` chunks for a query.
#[async_trait]
pub trait LlmFilter: Send + Sync {
    async fn filter(
        &self,
        query: &str,
        chunks: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;
}

/// LLM-backed filter over the shared chat client.
pub struct ChatLlmFilter {
    llm: Arc<dyn LlmClient>,
}

impl ChatLlmFilter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_prompt(query: &str, chunks: &[ScoredChunk], top_k: usize) -> String {
        let mut listing = String::new();
        for chunk in chunks {
            let preview: String = chunk.text.chars().take(CHUNK_PREVIEW_CHARS).collect();
            listing.push_str(&format!("[{}] {}\n\n", chunk.chunk_id, preview));
        }
        format!(
            "Select the chunks most relevant to the question.\n\
             \n\
             Question: {query}\n\
             \n\
             Candidate chunks (id in brackets):\n{listing}\
             Reply with the ids of the {top_k} most relevant chunks as a \
             comma-separated list (e.g. `12, 7, 3`), most relevant first. \
             Reply with ids only."
        )
    }

    /// Extracts candidate chunk ids from the model reply, in reply order.
    fn parse_ids(reply: &str) -> Vec<i64> {
        reply
            .split(|c: char| !c.is_ascii_digit() && c != '-')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<i64>().ok())
            .collect()
    }
}

#[async_trait]
impl LlmFilter for ChatLlmFilter {
    async fn filter(
        &self,
        query: &str,
        chunks: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        if chunks.len() <= top_k {
            return Ok(chunks);
        }

        let prompt = Self::build_prompt(query, &chunks, top_k);
        let messages = [Message::user(prompt)];
        let reply = match self.llm.invoke(&messages, &CompletionOptions::default()).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "llm filter call failed, truncating candidates");
                let mut out = chunks;
                out.truncate(top_k);
                return Ok(out);
            }
        };

        let wanted = Self::parse_ids(&reply);
        let mut picked: Vec<ScoredChunk> = Vec::with_capacity(top_k);
        let mut seen: HashSet<i64> = HashSet::new();
        for id in wanted {
            if picked.len() >= top_k {
                break;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(chunk) = chunks.iter().find(|c| c.chunk_id == id) {
                picked.push(chunk.clone());
            }
        }

        if picked.is_empty() {
            warn!("llm filter reply had no usable ids, truncating candidates");
            let mut out = chunks;
            out.truncate(top_k);
            return Ok(out);
        }

        info!(input = chunks.len(), output = picked.len(), "llm filtered");
        Ok(picked)
    }
}
