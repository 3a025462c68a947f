//! LLM client abstraction for the chat orchestrator and connectors.
//!
//! The orchestrator needs delta-level access to a streaming completion so it
//! can interleave token output with in-stream tool-call assembly; other
//! callers (query rewriter, title generation, LLM filter) only need the
//! complete response. The trait offers both.
//!
//! # Streaming
//!
//! `invoke_stream()` accepts a `Sender<StreamDelta>` and pushes one delta per
//! provider chunk: optional text plus zero or more tool-call fragments in the
//! provider-neutral [`ToolCallFragment`] shape. Providers that emit the
//! legacy single `function_call` shape are normalized to the same fragment
//! type at the adapter boundary, so the orchestrator sees exactly one
//! representation.

mod mock;
mod openai;

pub use mock::{MockLlm, ScriptedTurn};
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{Message, ToolCall};
use crate::tools::ToolSpec;

/// Tool choice mode for chat completions: when tools are present, controls
/// whether the model may choose (auto), must not use (none), or must use
/// (required).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    /// Model can pick between message or tool calls. Default when tools are present.
    #[default]
    Auto,
    /// Model will not call any tool.
    None,
    /// Model must call one or more tools.
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown tool_choice: {} (use auto, none, or required)",
                s
            )),
        }
    }
}

/// Token usage for one LLM call (prompt + completion).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One fragment of a tool call from a streamed delta.
///
/// Providers split calls arbitrarily: `name` and `arguments` may each arrive
/// over many fragments, `id` may be present only on the first fragment of a
/// call, and some providers emit fragments with an empty id for pieces of the
/// same call. `index` is the provider's call slot when it uses indexed
/// `tool_calls[]`; `None` for the legacy `function_call` shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// One streamed delta: optional text content plus tool-call fragments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

impl StreamDelta {
    /// A delta carrying only text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Per-call completion options: tools offered to the model and overrides.
#[derive(Clone, Debug, Default)]
pub struct CompletionOptions {
    /// Tools the model may call; empty means no tool calling.
    pub tools: Vec<ToolSpec>,
    /// Tool choice override; `None` leaves the provider default (auto when
    /// tools are present).
    pub tool_choice: Option<ToolChoiceMode>,
    /// Sampling temperature override.
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn with_tools(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }
}

/// Response from an LLM completion: assistant text and optional tool calls.
pub struct LlmResponse {
    /// Assistant message content (plain text).
    pub content: String,
    /// Tool calls from this turn; empty means a plain text reply.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this call, when the provider returns it.
    pub usage: Option<LlmUsage>,
}

/// Errors from LLM completion calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request build failed: {0}")]
    Request(String),
    #[error("provider error: {0}")]
    Api(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// LLM client: given messages, returns assistant text and optional tool calls.
///
/// `invoke` is the single-call API; `invoke_stream` additionally pushes
/// [`StreamDelta`]s through the channel as they arrive and still returns the
/// complete response at the end. The default `invoke_stream` delegates to
/// `invoke` and sends the full content as one delta, which is correct for
/// providers without streaming support.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke one turn: read messages, return assistant content and tool calls.
    async fn invoke(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Streaming variant: push deltas through `delta_tx` as they arrive.
    ///
    /// Send errors on `delta_tx` mean the consumer went away; implementations
    /// stop forwarding but still return the assembled response.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.invoke(messages, opts).await?;
        if !response.content.is_empty() {
            let _ = delta_tx.send(StreamDelta::text(response.content.clone())).await;
        }
        Ok(response)
    }
}
