//! In-stream tool-call assembly.
//!
//! Providers split tool calls across deltas in incompatible ways: indexed
//! `tool_calls[]` fragments, id-less continuation fragments, or the legacy
//! single `function_call` shape (fragments with no index at all). The
//! assembler folds every fragment into one internal accumulator and decides
//! completeness at stream end: a call is complete iff its name is non-empty
//! and its arguments are empty or parse as a JSON object.
//!
//! When no accumulated call is complete, a merge-by-name pass concatenates
//! argument pieces that arrived under separate id-less entries for the same
//! tool, then rechecks.

use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::ToolCallFragment;
use crate::message::ToolCall;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// Provider-indexed call (`tool_calls[index]`).
    Indexed(u32),
    /// Id-keyed call without an index.
    Keyed(String),
    /// Legacy single-call shape: no index, no id.
    Legacy,
}

#[derive(Debug)]
struct AssembledCall {
    slot: Slot,
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates tool-call fragments for one iteration's stream.
pub struct ToolCallAssembler {
    iteration: usize,
    detected: bool,
    calls: Vec<AssembledCall>,
}

impl ToolCallAssembler {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            detected: false,
            calls: Vec::new(),
        }
    }

    /// Whether any tool-call fragment has been seen. Latched true on the
    /// first fragment; the chat loop uses this to stop leaking text.
    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Folds one delta's fragments into the accumulator.
    pub fn absorb(&mut self, fragments: &[ToolCallFragment]) {
        for fragment in fragments {
            self.detected = true;
            let slot = match (&fragment.index, &fragment.id) {
                (Some(i), _) => Slot::Indexed(*i),
                (None, Some(id)) => Slot::Keyed(id.clone()),
                (None, None) => Slot::Legacy,
            };

            let position = match self.calls.iter().position(|c| c.slot == slot) {
                Some(p) => p,
                None => {
                    self.calls.push(AssembledCall {
                        slot,
                        id: fragment.id.clone().unwrap_or_default(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    self.calls.len() - 1
                }
            };
            let call = &mut self.calls[position];

            if let Some(id) = &fragment.id {
                if !id.is_empty() {
                    call.id = id.clone();
                }
            }
            if let Some(name) = &fragment.name {
                call.name.push_str(name);
            }
            call.arguments.push_str(&fragment.arguments);
        }
    }

    /// Finishes assembly: complete calls, else the merge-by-name fallback,
    /// else `None`. Returned calls always carry ids (synthesized when the
    /// provider sent none).
    pub fn finish(self) -> Option<Vec<ToolCall>> {
        let complete = complete_calls(&self.calls);
        if !complete.is_empty() {
            return Some(assign_ids(complete, self.iteration));
        }

        if self.calls.iter().all(|c| c.name.is_empty()) {
            warn!("tool call detected but no call accumulated a name");
            return None;
        }

        // Providers sometimes split arguments across id-less entries for the
        // same tool; merge those pieces in observed order and recheck.
        debug!(
            entries = self.calls.len(),
            "no complete tool calls, merging by name"
        );
        let mut merged: Vec<AssembledCall> = Vec::new();
        for call in self.calls {
            if call.name.is_empty() {
                continue;
            }
            match merged.iter_mut().find(|m| m.name == call.name) {
                Some(existing) => {
                    existing.arguments.push_str(&call.arguments);
                    if existing.id.is_empty() {
                        existing.id = call.id;
                    }
                }
                None => merged.push(call),
            }
        }

        let complete = complete_calls(&merged);
        if complete.is_empty() {
            warn!("tool calls still incomplete after merge pass");
            return None;
        }
        Some(assign_ids(complete, self.iteration))
    }
}

/// Complete iff named and arguments are empty or a valid JSON object.
fn complete_calls(calls: &[AssembledCall]) -> Vec<ToolCall> {
    calls
        .iter()
        .filter(|call| {
            if call.name.is_empty() {
                return false;
            }
            if call.arguments.is_empty() {
                return true;
            }
            matches!(
                serde_json::from_str::<Value>(&call.arguments),
                Ok(Value::Object(_))
            )
        })
        .map(|call| ToolCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            id: (!call.id.is_empty()).then(|| call.id.clone()),
        })
        .collect()
}

fn assign_ids(calls: Vec<ToolCall>, iteration: usize) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if call.id.is_none() {
                call.id = Some(format!("call_{iteration}_{i}"));
            }
            call
        })
        .collect()
}
