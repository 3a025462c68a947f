//! Conversation preparation: files, history filtering, trimming, and the
//! system prompt template.

use tracing::{info, warn};

use crate::chat::{ChatRequest, FileAttachment};
use crate::message::Message;
use crate::tools::ToolSpec;

/// Maximum messages kept when trimming history.
pub const MAX_CONVERSATION_TURNS: usize = 20;
/// Per-file character cap for attached content.
const MAX_FILE_CONTENT_CHARS: usize = 50_000;
/// Aggregate character cap across all attached files.
const MAX_TOTAL_FILE_CHARS: usize = 100_000;

const TOOLS_PLACEHOLDER: &str = "{tools}";

/// Stateless conversation/prompt builder.
#[derive(Debug, Clone)]
pub struct MessageProcessor {
    max_turns: usize,
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self {
            max_turns: MAX_CONVERSATION_TURNS,
        }
    }

    /// Builds the conversation for one request: filters history to
    /// user/assistant (stripping any tool calls), folds file payloads into
    /// the new user message, and trims to the turn budget.
    pub fn prepare_messages(&self, request: &ChatRequest) -> Vec<Message> {
        let file_block = format_files_for_message(request.files.as_deref().unwrap_or(&[]));
        let user_message = match (request.message.as_deref().unwrap_or(""), file_block.as_str()) {
            ("", "") => String::new(),
            (msg, "") => msg.to_string(),
            ("", files) => files.to_string(),
            (msg, files) => format!("{msg}\n\n{files}"),
        };

        let mut messages: Vec<Message> = request
            .messages
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|m| match m.role.as_str() {
                "user" => Some(Message::user(m.content.clone().unwrap_or_default())),
                // History re-entry drops tool linkage on purpose: only the
                // visible text of previous assistant turns is kept.
                "assistant" => Some(Message::assistant(m.content.clone().unwrap_or_default())),
                _ => None,
            })
            .collect();

        if !user_message.is_empty() {
            messages.push(Message::user(user_message));
        }

        self.trim_history(messages)
    }

    /// Keeps the most recent messages, preserving a leading system message.
    pub fn trim_history(&self, messages: Vec<Message>) -> Vec<Message> {
        if messages.len() <= self.max_turns {
            return messages;
        }
        if matches!(messages.first(), Some(Message::System(_))) {
            let tail_start = messages.len() - (self.max_turns - 1);
            let mut trimmed = vec![messages[0].clone()];
            trimmed.extend_from_slice(&messages[tail_start..]);
            trimmed
        } else {
            messages[messages.len() - self.max_turns..].to_vec()
        }
    }

    /// Builds the system prompt from the template: `{tools}` is replaced by
    /// a `- name: description` list of enabled tools; without the
    /// placeholder the list is appended under "Available Tools:".
    pub fn build_system_prompt(&self, template: &str, tools: &[ToolSpec]) -> String {
        let tool_list = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = if template.contains(TOOLS_PLACEHOLDER) {
            let replacement = if tool_list.is_empty() {
                "No tools available."
            } else {
                tool_list.as_str()
            };
            template.replace(TOOLS_PLACEHOLDER, replacement)
        } else if !tool_list.is_empty() {
            format!("{template}\n\nAvailable Tools:\n{tool_list}")
        } else {
            template.to_string()
        };

        info!(prompt_len = prompt.len(), "built system prompt");
        prompt
    }
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats uploaded files as `[File: name]` blocks with per-file and
/// aggregate size caps.
fn format_files_for_message(files: &[FileAttachment]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;

    for file in files {
        let name = file.name.as_deref().unwrap_or("untitled");
        let Some(content) = file.content.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };

        let truncated = truncate_chars(content, MAX_FILE_CONTENT_CHARS, name);
        if total + truncated.len() > MAX_TOTAL_FILE_CHARS {
            let remaining = MAX_TOTAL_FILE_CHARS.saturating_sub(total);
            if remaining > 0 {
                let clipped = truncate_chars(&truncated, remaining, name);
                parts.push(format!(
                    "[File: {name}]\n{clipped}\n\n[Note: remaining file content omitted due to size limit]"
                ));
            }
            warn!(file = name, "aggregate file size limit reached");
            break;
        }

        total += truncated.len();
        parts.push(format!("[File: {name}]\n{truncated}"));
    }

    parts.join("\n\n")
}

fn truncate_chars(content: &str, max_chars: usize, name: &str) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    warn!(file = name, max_chars, "file content truncated");
    let clipped: String = content.chars().take(max_chars).collect();
    format!("{clipped}\n[Note: content truncated]")
}
