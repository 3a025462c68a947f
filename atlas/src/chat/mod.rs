//! Streaming chat service with tool calling.
//!
//! [`ChatService::chat_stream`] runs the iterated stream-decode loop: stream
//! one LLM completion, interleave token output with in-stream tool-call
//! assembly ([`assembly`]), dispatch assembled calls through the executor
//! ([`executor`]), and re-enter the loop with the tool results appended.
//! [`processor`] prepares the conversation and system prompt; [`formatter`]
//! turns tool values into LLM-facing text.

mod assembly;
mod executor;
mod formatter;
mod processor;
mod service;

pub use assembly::ToolCallAssembler;
pub use executor::ToolExecutor;
pub use formatter::{
    check_tools_used_but_no_info, format_tool_result_for_llm, response_suggests_fallback_contact,
};
pub use processor::MessageProcessor;
pub use service::ChatService;

use serde::Deserialize;

/// One message as sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// One uploaded file attached to the request.
#[derive(Debug, Clone, Deserialize)]
pub struct FileAttachment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat request body for `/agent/message/stream`.
///
/// Clients either send `message` (single turn) or `messages` (full history
/// from the frontend) or both; `files` are folded into the user message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<WireMessage>>,
    #[serde(default)]
    pub files: Option<Vec<FileAttachment>>,
}
