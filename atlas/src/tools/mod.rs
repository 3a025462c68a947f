//! Function registry and tool abstraction.
//!
//! A [`Tool`] is one callable the LLM can invoke: in-process handlers
//! ([`FaqTool`], [`KnowledgeSearchTool`]) and remote tool-server tools
//! ([`crate::transport::RemoteTool`]) all implement the same trait, and the
//! [`FunctionRegistry`] unifies them under one name → callable map with an
//! enabled/disabled set and per-function config.
//!
//! ## Call context
//!
//! Tools that need the current conversation (e.g. context-aware retrieval)
//! receive it via [`ToolCallContext`]; the registry always offers the
//! context and tools that do not need it ignore it. This replaces any
//! signature-introspection dispatch: the handler decides, not the caller.

mod faq;
mod knowledge;
mod registry;
mod r#trait;

pub use faq::{FaqTool, FAQ_TOOL};
pub use knowledge::{KnowledgeSearchTool, KNOWLEDGE_SEARCH_TOOL};
pub use registry::{FunctionInfo, FunctionKind, FunctionRegistry, RegistryError};
pub use r#trait::Tool;

use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

/// Tool specification: name, LLM-facing description, and argument schema.
///
/// The same shape serves two purposes: it is what `tools/list` returns from a
/// tool server, and what [`FunctionRegistry::definitions_for_llm`] hands to
/// the provider adapter (`parameters` = `input_schema`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    /// Tool name (unique within a registry).
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: Option<String>,
    /// JSON Schema for arguments.
    #[serde(alias = "inputSchema")]
    pub input_schema: Value,
}

/// Errors from listing or calling tools.
#[derive(Debug, Error)]
pub enum ToolSourceError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool is disabled: {0}")]
    Disabled(String),
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Per-call context available to tools during execution.
///
/// Carries the conversation as it stands when the call is dispatched; tools
/// like [`KnowledgeSearchTool`] use it for context-aware query rewriting.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    /// Messages of the current conversation, oldest first.
    pub recent_messages: Vec<Message>,
}

impl ToolCallContext {
    pub fn new(recent_messages: Vec<Message>) -> Self {
        Self { recent_messages }
    }
}
