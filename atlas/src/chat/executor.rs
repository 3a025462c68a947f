//! Tool executor: runs a batch of assembled tool calls and feeds the
//! conversation.
//!
//! Independent calls execute concurrently, but tool messages are appended
//! in tool-call order so `assistant.tool_calls[i]` always pairs with the
//! i-th following tool message. Every outcome, including argument parse
//! failures, lands in the conversation as a tool message so the LLM sees
//! what happened.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use stream_event::ChatEvent;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chat::formatter::format_tool_result_for_llm;
use crate::message::{Message, ToolCall};
use crate::tools::{FunctionRegistry, ToolCallContext};

/// Consumer went away; the turn should stop quietly.
pub(crate) struct StreamClosed;

enum Prepared {
    Ready(Value),
    BadArguments(String),
}

pub struct ToolExecutor {
    registry: Arc<FunctionRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    /// Executes the batch: emits lifecycle events on `events`, appends tool
    /// messages to `conversation` in call order.
    pub(crate) async fn execute(
        &self,
        tool_calls: &[ToolCall],
        conversation: &mut Vec<Message>,
        events: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), StreamClosed> {
        // Parse arguments and announce every call before any runs.
        let mut prepared: Vec<Prepared> = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            let (input, state) = if call.arguments.is_empty() {
                (Value::Object(Default::default()), Prepared::Ready(Value::Object(Default::default())))
            } else {
                match serde_json::from_str::<Value>(&call.arguments) {
                    Ok(args) => (args.clone(), Prepared::Ready(args)),
                    Err(e) => {
                        error!(
                            tool = %call.name,
                            error = %e,
                            "failed to parse tool call arguments"
                        );
                        (
                            Value::String(call.arguments.clone()),
                            Prepared::BadArguments(format!(
                                "invalid arguments: incomplete or malformed JSON ({e})"
                            )),
                        )
                    }
                }
            };
            send(
                events,
                ChatEvent::ToolCallStart {
                    tool: call.name.clone(),
                    tool_call_id: call_id(call),
                    input,
                },
            )
            .await?;
            prepared.push(state);
        }

        // The context snapshots the conversation as of dispatch; results are
        // appended only after the whole batch ran.
        let ctx = ToolCallContext::new(conversation.clone());
        let executions = tool_calls.iter().zip(&prepared).map(|(call, state)| {
            let registry = Arc::clone(&self.registry);
            let ctx = &ctx;
            async move {
                match state {
                    Prepared::BadArguments(e) => Err(e.clone()),
                    Prepared::Ready(args) => registry
                        .call(&call.name, args.clone(), Some(ctx))
                        .await
                        .map_err(|e| e.to_string()),
                }
            }
        });
        let outcomes = join_all(executions).await;

        // Ordered append: outcome i pairs with tool_calls[i].
        for (call, outcome) in tool_calls.iter().zip(outcomes) {
            let id = call_id(call);
            match outcome {
                Ok(value) => {
                    info!(tool = %call.name, "tool call succeeded");
                    let content = format_tool_result_for_llm(&value, &call.name);
                    send(
                        events,
                        ChatEvent::ToolCallEnd {
                            tool: call.name.clone(),
                            tool_call_id: id.clone(),
                            result: value,
                        },
                    )
                    .await?;
                    conversation.push(Message::tool(id, call.name.clone(), content));
                }
                Err(e) => {
                    error!(tool = %call.name, error = %e, "tool call failed");
                    send(
                        events,
                        ChatEvent::ToolCallError {
                            tool: call.name.clone(),
                            tool_call_id: id.clone(),
                            error: e.clone(),
                        },
                    )
                    .await?;
                    conversation.push(Message::tool(
                        id,
                        call.name.clone(),
                        format!("Error: {e}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn call_id(call: &ToolCall) -> String {
    call.id.clone().unwrap_or_default()
}

async fn send(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), StreamClosed> {
    events.send(event).await.map_err(|_| StreamClosed)
}
