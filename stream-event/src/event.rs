//! Typed stream events for one chat turn (wire shape: type + payload).
//!
//! Serialized as `{"type": "...", ...payload}` and written as one SSE
//! `data:` line per event by the HTTP layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in a chat response stream.
///
/// Ordering within a turn: zero or more `Chunk`/`ToolCall*` events, then a
/// terminal `Done` or `Error`. A `ToolCallStart` always precedes the matching
/// `ToolCallEnd` or `ToolCallError` for the same `tool_call_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental assistant text.
    Chunk { content: String },
    /// A tool call is about to execute; `input` is the parsed arguments.
    ToolCallStart {
        tool: String,
        tool_call_id: String,
        input: Value,
    },
    /// Tool call finished; `result` is the raw tool value.
    ToolCallEnd {
        tool: String,
        tool_call_id: String,
        result: Value,
    },
    /// Tool call failed (bad arguments, handler error, timeout).
    ToolCallError {
        tool: String,
        tool_call_id: String,
        error: String,
    },
    /// Terminal event: the turn completed normally.
    Done,
    /// Terminal event: the turn failed before completing.
    Error { content: String },
}

impl ChatEvent {
    /// Serializes this event to its wire JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Chunk serializes with `type: "chunk"` and content payload.
    #[test]
    fn chunk_serializes_with_type_tag() {
        let ev = ChatEvent::Chunk {
            content: "hello".into(),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "chunk");
        assert_eq!(v["content"], "hello");
    }

    /// **Scenario**: Tool call events carry tool, tool_call_id, and payload field.
    #[test]
    fn tool_call_events_carry_identifiers() {
        let start = ChatEvent::ToolCallStart {
            tool: "faq_search".into(),
            tool_call_id: "call_1".into(),
            input: serde_json::json!({"query": "visa"}),
        };
        let v = start.to_value().unwrap();
        assert_eq!(v["type"], "tool_call_start");
        assert_eq!(v["tool"], "faq_search");
        assert_eq!(v["input"]["query"], "visa");

        let err = ChatEvent::ToolCallError {
            tool: "faq_search".into(),
            tool_call_id: "call_1".into(),
            error: "invalid arguments".into(),
        };
        let v = err.to_value().unwrap();
        assert_eq!(v["type"], "tool_call_error");
        assert_eq!(v["error"], "invalid arguments");
    }

    /// **Scenario**: Done serializes to a bare `{"type":"done"}` object.
    #[test]
    fn done_serializes_without_payload() {
        let v = ChatEvent::Done.to_value().unwrap();
        assert_eq!(v, serde_json::json!({"type": "done"}));
    }

    /// **Scenario**: Each variant round-trips through serde.
    #[test]
    fn events_roundtrip_through_serde() {
        for ev in [
            ChatEvent::Chunk {
                content: "c".into(),
            },
            ChatEvent::ToolCallEnd {
                tool: "t".into(),
                tool_call_id: "id".into(),
                result: serde_json::json!({"answer": "a"}),
            },
            ChatEvent::Done,
            ChatEvent::Error {
                content: "boom".into(),
            },
        ] {
            let json = serde_json::to_string(&ev).unwrap();
            let back: ChatEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(ev, back);
        }
    }
}
