//! FAQ tool: keyword lookup over a curated question/answer set.
//!
//! Entries come from a YAML file (`keyword -> answer`) or the built-in
//! travel set. Matching is case-insensitive keyword containment over the
//! query; the first matching keyword wins. A miss returns an explicit
//! not-found value (`answer: null, found: false`) so the result formatter
//! can frame it for the LLM instead of letting the model guess.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::tools::{Tool, ToolCallContext, ToolSourceError, ToolSpec};

pub const FAQ_TOOL: &str = "faq_search";
const FAQ_SOURCE: &str = "travel_faq_database";

/// In-process FAQ lookup tool.
pub struct FaqTool {
    entries: Vec<(String, String)>,
}

impl FaqTool {
    /// FAQ tool with the built-in travel entries.
    pub fn new() -> Self {
        Self {
            entries: default_entries(),
        }
    }

    /// FAQ tool with explicit keyword → answer entries (order is match priority).
    pub fn with_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Loads entries from a YAML mapping of keyword to answer.
    /// `serde_yaml::Mapping` preserves file order, which is match priority.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let mapping: serde_yaml::Mapping = serde_yaml::from_str(content)?;
        let entries = mapping
            .into_iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
            .collect();
        Ok(Self { entries })
    }

    fn lookup(&self, query: &str) -> Option<&(String, String)> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .find(|(keyword, _)| query.contains(&keyword.to_lowercase()))
    }
}

impl Default for FaqTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FaqTool {
    fn name(&self) -> &str {
        FAQ_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: FAQ_TOOL.to_string(),
            description: Some(
                "Travel FAQ tool: search the travel FAQ database for pre-approved answers \
                 to common questions (visas, passports, insurance, luggage, ...). \
                 If no answer is found, try another tool next."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The travel-related question to look up in the FAQ database."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<Value, ToolSourceError> {
        let query = args
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'query'".into()))?;

        match self.lookup(query) {
            Some((keyword, answer)) => {
                info!(query = %query, matched_key = %keyword, "faq match");
                Ok(json!({
                    "answer": answer,
                    "matched_key": keyword,
                    "source": FAQ_SOURCE,
                }))
            }
            None => {
                info!(query = %query, "faq miss");
                Ok(json!({
                    "answer": null,
                    "matched_key": null,
                    "found": false,
                    "message": "No matching answer in the FAQ database.",
                    "source": FAQ_SOURCE,
                }))
            }
        }
    }
}

fn default_entries() -> Vec<(String, String)> {
    [
        (
            "visa",
            "Most countries require a visa applied for in advance. Apply at least 2-4 weeks \
             before departure and check the destination embassy's site for requirements.",
        ),
        (
            "passport",
            "Passports usually need at least 6 months of validity. Make sure yours covers the \
             whole trip with margin.",
        ),
        (
            "insurance",
            "Travel insurance covering medical care, lost luggage, and trip cancellation is \
             strongly recommended.",
        ),
        (
            "currency",
            "Exchange some local currency before departure or withdraw from an ATM on arrival. \
             Credit cards are accepted in most countries.",
        ),
        (
            "vaccination",
            "Some destinations require proof of vaccination. Check the destination's health \
             requirements or ask a doctor.",
        ),
        (
            "luggage",
            "Check your airline's baggage limits. Economy usually allows one carry-on and one \
             checked bag.",
        ),
        (
            "timezone",
            "Check the destination's timezone before travelling so you can plan around the \
             time difference.",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
