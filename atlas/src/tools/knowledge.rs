//! Knowledge-base search tool: the chat-side entry point into the RAG engine.
//!
//! Wraps [`RagOrchestrator`]; the conversation history comes from the call
//! context so query rewriting and multi-round refinement can use it. Errors
//! degrade to an explicit empty-results value (`source: "rag_system"`) so
//! the chat loop keeps going and the LLM is told nothing was found.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::rag::RagOrchestrator;
use crate::tools::{Tool, ToolCallContext, ToolSourceError, ToolSpec};

pub const KNOWLEDGE_SEARCH_TOOL: &str = "knowledge_search";

/// RAG retrieval as a registry function.
pub struct KnowledgeSearchTool {
    orchestrator: Arc<RagOrchestrator>,
}

impl KnowledgeSearchTool {
    pub fn new(orchestrator: Arc<RagOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        KNOWLEDGE_SEARCH_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: KNOWLEDGE_SEARCH_TOOL.to_string(),
            description: Some(
                "Knowledge-base search: retrieve relevant document chunks from the knowledge \
                 base. Provide the user's original question; query optimization, retrieval \
                 strategy, and multi-round search are handled automatically."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The user's question. The system rewrites it using \
                                        conversation history and runs the configured \
                                        retrieval strategy."
                    },
                    "pipeline_name": {
                        "type": "string",
                        "description": "Retrieval pipeline name.",
                        "default": "default"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<Value, ToolSourceError> {
        let query = args
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'query'".into()))?;
        let pipeline_name = args
            .get("pipeline_name")
            .and_then(|p| p.as_str())
            .unwrap_or("default");

        let history = ctx.map(|c| c.recent_messages.as_slice()).unwrap_or(&[]);

        match self.orchestrator.retrieve(query, history).await {
            Ok(response) => {
                info!(
                    query = %query,
                    results = response.results.len(),
                    "knowledge search completed"
                );
                let mut value = serde_json::to_value(&response)
                    .map_err(|e| ToolSourceError::Execution(e.to_string()))?;
                if let Some(obj) = value.as_object_mut() {
                    obj.entry("pipeline_name")
                        .or_insert_with(|| Value::String(pipeline_name.to_string()));
                }
                Ok(value)
            }
            Err(e) => {
                error!(query = %query, error = %e, "knowledge search failed");
                Ok(json!({
                    "query": query,
                    "results": [],
                    "error": e.to_string(),
                    "source": "rag_system",
                }))
            }
        }
    }
}
