//! Scripted mock LLM for tests.
//!
//! Each call pops the next [`ScriptedTurn`] and replays its deltas through
//! the stream channel, then returns the assembled response. This lets
//! orchestrator tests drive exact delta sequences: split tool-call
//! fragments, text-after-tool-call, empty streams, provider errors.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::llm::{
    CompletionOptions, LlmClient, LlmError, LlmResponse, StreamDelta, ToolCallFragment,
};
use crate::message::{Message, ToolCall};

/// One scripted completion: the deltas to replay, or an error to return.
#[derive(Debug, Default)]
pub struct ScriptedTurn {
    pub deltas: Vec<StreamDelta>,
    pub error: Option<String>,
}

impl ScriptedTurn {
    /// A turn that streams the given text as one chunk per string.
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            deltas: chunks.iter().map(|c| StreamDelta::text(*c)).collect(),
            error: None,
        }
    }

    /// A turn that emits one complete tool call split into two fragments
    /// (name first, then arguments), the common provider pattern.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            deltas: vec![
                StreamDelta {
                    content: None,
                    tool_calls: vec![ToolCallFragment {
                        index: Some(0),
                        id: Some(id.to_string()),
                        name: Some(name.to_string()),
                        arguments: String::new(),
                    }],
                },
                StreamDelta {
                    content: None,
                    tool_calls: vec![ToolCallFragment {
                        index: Some(0),
                        id: None,
                        name: None,
                        arguments: arguments.to_string(),
                    }],
                },
            ],
            error: None,
        }
    }

    /// A turn that fails with the given provider error.
    pub fn error(message: &str) -> Self {
        Self {
            deltas: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

/// Mock `LlmClient` replaying scripted turns in order.
///
/// When the script runs out, returns an empty response (no text, no calls),
/// which exercises the orchestrator's fallback paths.
pub struct MockLlm {
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl MockLlm {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// Convenience: a mock that always answers with the given text.
    pub fn with_reply(text: &str) -> Self {
        Self::new(vec![ScriptedTurn::text(&[text])])
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.turns
            .lock()
            .map(|mut q| q.pop_front().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Assembles the response a provider would return for these deltas.
    fn assemble(deltas: &[StreamDelta]) -> LlmResponse {
        let mut content = String::new();
        let mut calls: Vec<(Option<u32>, ToolCall)> = Vec::new();
        for delta in deltas {
            if let Some(ref c) = delta.content {
                content.push_str(c);
            }
            for frag in &delta.tool_calls {
                let position = calls.iter().position(|(idx, _)| *idx == frag.index);
                let slot = match position {
                    Some(p) => p,
                    None => {
                        calls.push((frag.index, ToolCall::default()));
                        calls.len() - 1
                    }
                };
                let call = &mut calls[slot].1;
                if let Some(ref id) = frag.id {
                    call.id = Some(id.clone());
                }
                if let Some(ref name) = frag.name {
                    call.name.push_str(name);
                }
                call.arguments.push_str(&frag.arguments);
            }
        }
        LlmResponse {
            content,
            tool_calls: calls.into_iter().map(|(_, c)| c).collect(),
            usage: None,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        _messages: &[Message],
        _opts: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let turn = self.next_turn();
        if let Some(err) = turn.error {
            return Err(LlmError::Api(err));
        }
        Ok(Self::assemble(&turn.deltas))
    }

    async fn invoke_stream(
        &self,
        _messages: &[Message],
        _opts: &CompletionOptions,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, LlmError> {
        let turn = self.next_turn();
        if let Some(err) = turn.error {
            return Err(LlmError::Stream(err));
        }
        for delta in &turn.deltas {
            let _ = delta_tx.send(delta.clone()).await;
        }
        Ok(Self::assemble(&turn.deltas))
    }
}
