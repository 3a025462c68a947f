//! Conversation message types.
//!
//! Roles: System (usually first), User, Assistant (may carry tool calls),
//! Tool (the result of one tool call, linked by `tool_call_id`).
//!
//! Invariant maintained by the chat loop: every `Tool` message's
//! `tool_call_id` refers to a tool call carried by an earlier Assistant
//! message in the same conversation, and the tool messages for one assistant
//! turn appear together, in tool-call order, directly after it.

use serde::{Deserialize, Serialize};

/// A single tool invocation produced by the LLM and consumed by the executor.
///
/// `arguments` is the raw JSON text as streamed by the provider; it is parsed
/// only at execution time so partially-assembled calls can be represented.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Tool name as registered in the function registry.
    pub name: String,
    /// Arguments as JSON text; empty means "no arguments".
    pub arguments: String,
    /// Provider-assigned id used to pair the call with its Tool message.
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<Option<String>>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
            id: id.into(),
        }
    }
}

/// Message role, as used on the wire (`"system"`, `"user"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System(String),
    /// User input.
    User(String),
    /// Model reply; `tool_calls` is non-empty on tool-calling turns.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call, linked to the requesting assistant turn.
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates a plain assistant message (no tool calls).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Creates an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Creates a tool-result message.
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Role of this message.
    pub fn role(&self) -> Role {
        match self {
            Message::System(_) => Role::System,
            Message::User(_) => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    /// Text content of this message regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System(s) | Message::User(s) => s,
            Message::Assistant { content, .. } => content,
            Message::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by this message (empty for non-assistant roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}
