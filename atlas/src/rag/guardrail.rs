//! Input and output guardrails: pattern policies around retrieval.

use regex::Regex;
use tracing::{info, warn};

use crate::rag::{InputGuardrailConfig, OutputGuardrailConfig, RagError, RetrievalResult};

const REDACTION: &str = "[REDACTED]";

/// Outcome of the input check for an accepted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputCheck {
    /// The query matched a sensitive pattern and is tagged for downstream
    /// handling (it still proceeds).
    pub sensitive: bool,
}

/// Pre-retrieval validation: length cap, blocked patterns, sensitive tags.
pub struct InputGuardrail {
    enabled: bool,
    max_query_length: usize,
    blocked: Vec<Regex>,
    sensitive: Vec<Regex>,
}

impl InputGuardrail {
    pub fn from_config(config: &InputGuardrailConfig) -> Result<Self, RagError> {
        Ok(Self {
            enabled: config.enabled,
            max_query_length: config.max_query_length,
            blocked: compile(&config.blocked_patterns)?,
            sensitive: compile(&config.sensitive_patterns)?,
        })
    }

    /// Validates the query; rejection is an error, sensitivity is a tag.
    pub fn check(&self, query: &str) -> Result<InputCheck, RagError> {
        if !self.enabled {
            return Ok(InputCheck { sensitive: false });
        }
        if query.chars().count() > self.max_query_length {
            return Err(RagError::Rejected(format!(
                "query exceeds maximum length of {} characters",
                self.max_query_length
            )));
        }
        if let Some(pattern) = self.blocked.iter().find(|p| p.is_match(query)) {
            warn!(pattern = %pattern.as_str(), "query blocked by guardrail");
            return Err(RagError::Rejected("query matches a blocked pattern".into()));
        }
        let sensitive = self.sensitive.iter().any(|p| p.is_match(query));
        if sensitive {
            info!("query tagged as sensitive");
        }
        Ok(InputCheck { sensitive })
    }
}

/// Post-retrieval filtering: redaction and relevance validation.
pub struct OutputGuardrail {
    filter_sensitive_info: bool,
    sensitive: Vec<Regex>,
    validate_relevance: bool,
    relevance_floor: f64,
}

impl OutputGuardrail {
    pub fn from_config(config: &OutputGuardrailConfig) -> Result<Self, RagError> {
        Ok(Self {
            filter_sensitive_info: config.filter_sensitive_info,
            sensitive: compile(&config.sensitive_patterns)?,
            validate_relevance: config.validate_relevance,
            relevance_floor: config.relevance_floor,
        })
    }

    /// Applies redaction and relevance filtering to the final result list.
    pub fn apply(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let mut out = Vec::with_capacity(results.len());
        for mut result in results {
            if self.validate_relevance {
                if let Some(score) = result.score {
                    if score > self.relevance_floor {
                        continue;
                    }
                }
            }
            if self.filter_sensitive_info {
                for pattern in &self.sensitive {
                    result.text = pattern.replace_all(&result.text, REDACTION).into_owned();
                }
            }
            out.push(result);
        }
        out
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, RagError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| RagError::Config(format!("invalid pattern '{}': {}", p, e)))
        })
        .collect()
}
