//! LLM-driven query rewriting.
//!
//! Turns the user's conversational question into a retrieval-friendly query
//! using recent history. Strictly best-effort: empty or too-short rewrites
//! and LLM failures all fall back to the original query, and rewriting is
//! skipped entirely without history or when disabled.

use std::sync::Arc;

use tracing::{info, warn};

use crate::llm::{CompletionOptions, LlmClient};
use crate::message::Message;
use crate::rag::strategy::char_prefix;

const HISTORY_MESSAGES: usize = 5;
const HISTORY_CONTENT_CHARS: usize = 200;
const MIN_REWRITE_CHARS: usize = 2;

pub struct QueryRewriter {
    llm: Option<Arc<dyn LlmClient>>,
    enabled: bool,
}

impl QueryRewriter {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, enabled: bool) -> Self {
        Self { llm, enabled }
    }

    /// Rewrites `query` for retrieval; returns the original on any failure.
    pub async fn rewrite(&self, query: &str, history: &[Message]) -> String {
        if !self.enabled || history.is_empty() {
            return query.to_string();
        }
        let Some(llm) = &self.llm else {
            return query.to_string();
        };

        let prompt = build_rewrite_prompt(query, history);
        let messages = [Message::user(prompt)];
        match llm.invoke(&messages, &CompletionOptions::default()).await {
            Ok(response) => {
                let rewritten = response.content.trim().to_string();
                if rewritten.chars().count() < MIN_REWRITE_CHARS {
                    warn!("query rewrite produced empty/short output, using original");
                    return query.to_string();
                }
                info!(
                    original_len = query.len(),
                    rewritten_len = rewritten.len(),
                    "query rewritten"
                );
                rewritten
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed, using original");
                query.to_string()
            }
        }
    }
}

fn build_rewrite_prompt(query: &str, history: &[Message]) -> String {
    let start = history.len().saturating_sub(HISTORY_MESSAGES);
    let context_text: Vec<String> = history[start..]
        .iter()
        .map(|m| {
            format!(
                "{}: {}",
                match m.role() {
                    crate::message::Role::System => "system",
                    crate::message::Role::User => "user",
                    crate::message::Role::Assistant => "assistant",
                    crate::message::Role::Tool => "tool",
                },
                char_prefix(m.content(), HISTORY_CONTENT_CHARS)
            )
        })
        .collect();

    format!(
        "You are a search query optimizer. Given the conversation history and the \
         user's current question, produce one optimized search query.\n\
         \n\
         Guidelines:\n\
         1. Extract the key entities (places, dates, topics, people).\n\
         2. Fold in context from the history when the question refers back to it.\n\
         3. Make vague questions concrete.\n\
         4. Keep it short: 2-10 words.\n\
         \n\
         Conversation history:\n{}\n\
         \n\
         Current question:\n{}\n\
         \n\
         Reply with the optimized query only, no explanation.",
        context_text.join("\n"),
        query
    )
}
