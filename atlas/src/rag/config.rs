//! RAG engine configuration.
//!
//! Mirrors the persisted YAML shape; every section has serde defaults so a
//! minimal config (`sources` only) works.

use serde::{Deserialize, Serialize};

/// Retrieval strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SingleRound,
    #[default]
    MultiRound,
    Parallel,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SingleRound => "single_round",
            StrategyKind::MultiRound => "multi_round",
            StrategyKind::Parallel => "parallel",
        }
    }
}

/// Query rewriter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Model override for the rewrite call; `None` uses the chat client's model.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
        }
    }
}

/// One retrieval source endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind; `retrieval_service` is the only built-in.
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_type: default_source_type(),
            enabled: true,
            url: default_source_url(),
            pipeline_name: default_pipeline_name(),
            timeout_secs: default_source_timeout(),
        }
    }
}

/// Result cache settings (TTL + LRU bound).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

/// Result processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// When the same chunk reappears across sub-queries, keep the
    /// smallest-distance instance instead of the first seen.
    #[serde(default = "default_true")]
    pub merge_keep_best_score: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            merge_keep_best_score: true,
        }
    }
}

/// Pre-retrieval validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputGuardrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
}

impl Default for InputGuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_query_length: default_max_query_length(),
            blocked_patterns: Vec::new(),
            sensitive_patterns: Vec::new(),
        }
    }
}

/// Post-retrieval filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputGuardrailConfig {
    #[serde(default)]
    pub filter_sensitive_info: bool,
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
    #[serde(default)]
    pub validate_relevance: bool,
    /// Distance above which results are dropped when `validate_relevance`.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f64,
}

impl Default for OutputGuardrailConfig {
    fn default() -> Self {
        Self {
            filter_sensitive_info: false,
            sensitive_patterns: Vec::new(),
            validate_relevance: false,
            relevance_floor: default_relevance_floor(),
        }
    }
}

/// Top-level RAG configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_min_results")]
    pub min_results_threshold: usize,
    /// Optional distance threshold for the multi-round quality stop.
    #[serde(default)]
    pub min_score_threshold: Option<f64>,
    #[serde(default = "default_num_variants")]
    pub num_variants: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub query_rewriter: RewriterConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub input_guardrail: InputGuardrailConfig,
    #[serde(default)]
    pub output_guardrail: OutputGuardrailConfig,
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: StrategyKind::default(),
            max_rounds: default_max_rounds(),
            min_results_threshold: default_min_results(),
            min_score_threshold: None,
            num_variants: default_num_variants(),
            top_k: default_top_k(),
            query_rewriter: RewriterConfig::default(),
            sources: Vec::new(),
            cache: CacheConfig::default(),
            processor: ProcessorConfig::default(),
            input_guardrail: InputGuardrailConfig::default(),
            output_guardrail: OutputGuardrailConfig::default(),
            fallback_on_error: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_source_type() -> String {
    "retrieval_service".into()
}
fn default_source_url() -> String {
    "http://localhost:8001".into()
}
fn default_pipeline_name() -> String {
    "default".into()
}
fn default_source_timeout() -> u64 {
    30
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_entries() -> usize {
    128
}
fn default_max_results() -> usize {
    10
}
fn default_max_query_length() -> usize {
    512
}
fn default_relevance_floor() -> f64 {
    1.0
}
fn default_max_rounds() -> usize {
    3
}
fn default_min_results() -> usize {
    3
}
fn default_num_variants() -> usize {
    3
}
fn default_top_k() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a minimal YAML config fills every section with defaults.
    #[test]
    fn minimal_yaml_uses_defaults() {
        let config: RagConfig = serde_yaml::from_str(
            "sources:\n  - url: http://kb.internal:8001\n    pipeline_name: docs\n",
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.strategy, StrategyKind::MultiRound);
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].url, "http://kb.internal:8001");
        assert_eq!(config.sources[0].timeout_secs, 30);
        assert!(config.fallback_on_error);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    /// **Scenario**: strategy names parse from their wire spelling.
    #[test]
    fn strategy_kind_parses_wire_names() {
        let config: RagConfig = serde_yaml::from_str("strategy: parallel\n").unwrap();
        assert_eq!(config.strategy, StrategyKind::Parallel);
        assert_eq!(config.strategy.as_str(), "parallel");
    }
}
