//! Pipeline configuration: YAML storage, env substitution, auto-reload.
//!
//! A pipelines file holds named [`PipelineConfig`]s plus a default name.
//! String values support `env:NAME` (whole value) and `${NAME}` (embedded)
//! environment substitution at load time. The manager reloads when the
//! file's mtime changes and synthesizes a default pipeline for empty files.
//!
//! Embedding model entries are parsed **once** into the typed
//! [`EmbedderId`] + collection pair; the string shorthands (`provider`,
//! `provider:model`, `model:collection`, `provider:model:collection`) exist
//! only at the YAML boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retrieval::PipelineError;

const ENV_PREFIX: &str = "env:";
const DEFAULT_PIPELINE_NAME: &str = "memory";

/// Vector store connection settings (consumed by the external adapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MilvusConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub collection: String,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 19530,
            user: String::new(),
            password: String::new(),
            database: "default".into(),
            collection: "memory_doc_db".into(),
        }
    }
}

/// Rerank endpoint settings; an empty `api_url` disables the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub api_url: String,
    pub model: String,
    pub timeout: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            model: String::new(),
            timeout: 30,
        }
    }
}

/// LLM filter settings; empty `base_url` and `model` disable the stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmFilterConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Per-stage result counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    pub top_k_per_model: usize,
    pub rerank_top_k: usize,
    pub final_top_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k_per_model: 10,
            rerank_top_k: 20,
            final_top_k: 10,
        }
    }
}

/// Per-stage input sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizes {
    pub initial_search: usize,
    pub rerank_input: usize,
    pub llm_filter_input: usize,
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self {
            initial_search: 100,
            rerank_input: 50,
            llm_filter_input: 20,
        }
    }
}

/// Typed embedding model identity: provider plus optional model override.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbedderId {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EmbedderId {
    /// Stable key for logs, debug payloads, and embedder maps.
    pub fn key(&self) -> String {
        match &self.model {
            Some(model) => format!("{}:{}", self.provider, model),
            None => self.provider.clone(),
        }
    }
}

/// One embedding model bound to exactly one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingModelConfig {
    pub id: EmbedderId,
    pub collection: String,
}

/// Providers recognized in the string shorthand.
const KNOWN_PROVIDERS: &[&str] = &["qwen", "bge", "openai"];

impl EmbeddingModelConfig {
    /// Parses the string shorthand: `provider`, `provider:model`,
    /// `model:collection`, or `provider:model:collection`.
    fn from_shorthand(value: &str, default_collection: &str) -> Self {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [provider] => Self {
                id: EmbedderId {
                    provider: provider.to_string(),
                    model: None,
                },
                collection: default_collection.to_string(),
            },
            [first, second] if KNOWN_PROVIDERS.contains(first) => Self {
                id: EmbedderId {
                    provider: first.to_string(),
                    model: Some(second.to_string()),
                },
                collection: default_collection.to_string(),
            },
            [model, collection] => Self {
                id: EmbedderId {
                    provider: model.to_string(),
                    model: None,
                },
                collection: collection.to_string(),
            },
            [provider, model, collection] => Self {
                id: EmbedderId {
                    provider: provider.to_string(),
                    model: Some(model.to_string()),
                },
                collection: collection.to_string(),
            },
            _ => Self {
                id: EmbedderId {
                    provider: value.to_string(),
                    model: None,
                },
                collection: default_collection.to_string(),
            },
        }
    }
}

/// YAML-side entry: string shorthand or explicit map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum EmbeddingModelEntry {
    Shorthand(String),
    Explicit {
        model: String,
        #[serde(default)]
        collection: Option<String>,
    },
}

/// One named pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub milvus: MilvusConfig,
    #[serde(default = "default_embedding_models")]
    embedding_models: Vec<EmbeddingModelEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_filter: Option<LlmFilterConfig>,
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub chunk_sizes: ChunkSizes,
}

fn default_embedding_models() -> Vec<EmbeddingModelEntry> {
    vec![EmbeddingModelEntry::Shorthand("qwen".into())]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            milvus: MilvusConfig::default(),
            embedding_models: default_embedding_models(),
            rerank: None,
            llm_filter: None,
            retrieval: RetrievalParams::default(),
            chunk_sizes: ChunkSizes::default(),
        }
    }
}

impl PipelineConfig {
    /// Typed embedding model configs, collections defaulted per pipeline.
    pub fn embedding_model_configs(&self) -> Vec<EmbeddingModelConfig> {
        let default_collection = &self.milvus.collection;
        self.embedding_models
            .iter()
            .map(|entry| match entry {
                EmbeddingModelEntry::Shorthand(s) => {
                    EmbeddingModelConfig::from_shorthand(s, default_collection)
                }
                EmbeddingModelEntry::Explicit { model, collection } => {
                    let mut parsed = EmbeddingModelConfig::from_shorthand(
                        model,
                        collection.as_deref().unwrap_or(default_collection),
                    );
                    if let Some(c) = collection {
                        parsed.collection = c.clone();
                    }
                    parsed
                }
            })
            .collect()
    }

    /// Whether the rerank stage is enabled (non-empty endpoint).
    pub fn rerank_enabled(&self) -> bool {
        self.rerank
            .as_ref()
            .map(|r| !r.api_url.trim().is_empty())
            .unwrap_or(false)
    }

    /// Whether the LLM filter stage is enabled (endpoint or model set).
    pub fn llm_filter_enabled(&self) -> bool {
        self.llm_filter
            .as_ref()
            .map(|f| !f.base_url.trim().is_empty() || !f.model.trim().is_empty())
            .unwrap_or(false)
    }

    /// Collapses rerank/llm_filter sections that are present but empty, then
    /// checks the stage-size invariants.
    pub fn normalize_and_validate(&mut self) -> Result<(), PipelineError> {
        if !self.rerank_enabled() {
            self.rerank = None;
        }
        if !self.llm_filter_enabled() {
            self.llm_filter = None;
        }

        let models = self.embedding_model_configs();
        if models.is_empty() {
            return Err(PipelineError::Config(
                "no embedding models configured".into(),
            ));
        }
        let max_candidates = self.chunk_sizes.initial_search * models.len();
        if self.retrieval.rerank_top_k > max_candidates {
            return Err(PipelineError::Config(format!(
                "rerank_top_k ({}) exceeds initial_search x models ({})",
                self.retrieval.rerank_top_k, max_candidates
            )));
        }
        if self.retrieval.final_top_k > self.retrieval.rerank_top_k {
            return Err(PipelineError::Config(format!(
                "final_top_k ({}) exceeds rerank_top_k ({})",
                self.retrieval.final_top_k, self.retrieval.rerank_top_k
            )));
        }
        Ok(())
    }
}

/// Top-level pipelines file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelinesFile {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub pipelines: HashMap<String, PipelineConfig>,
}

struct ManagerState {
    cache: Option<PipelinesFile>,
    last_mtime: Option<SystemTime>,
}

/// Manages pipeline configurations stored in YAML.
pub struct PipelineConfigManager {
    path: PathBuf,
    state: Mutex<ManagerState>,
}

impl PipelineConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(ManagerState {
                cache: None,
                last_mtime: None,
            }),
        }
    }

    /// All pipelines (auto-reload when the file changed on disk).
    pub fn get_pipelines(&self) -> Result<PipelinesFile, PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mtime = self.mtime();
        if state.cache.is_none() || (mtime.is_some() && state.last_mtime != mtime) {
            self.load_locked(&mut state)?;
        }
        Ok(state.cache.clone().unwrap_or_default())
    }

    /// One pipeline by name, falling back to the default.
    pub fn get_pipeline(&self, name: Option<&str>) -> Result<PipelineConfig, PipelineError> {
        let file = self.get_pipelines()?;
        let name = name
            .map(str::to_string)
            .or(file.default.clone())
            .ok_or_else(|| PipelineError::Config("no default pipeline set".into()))?;
        file.pipelines
            .get(&name)
            .cloned()
            .ok_or(PipelineError::UnknownPipeline(name))
    }

    /// Creates or updates a pipeline and persists the file.
    pub fn set_pipeline(
        &self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<PipelinesFile, PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.load_locked(&mut state)?;
        let resolved = resolve_env(config);
        let mut validated: PipelineConfig = serde_yaml::from_value(resolved)?;
        validated.normalize_and_validate()?;

        let mut file = state.cache.clone().unwrap_or_default();
        file.pipelines.insert(name.to_string(), validated);
        if file.default.is_none() {
            file.default = Some(name.to_string());
        }
        self.write_locked(&mut state, file.clone())?;
        Ok(file)
    }

    /// Deletes a pipeline; the default moves to any remaining pipeline.
    pub fn delete_pipeline(&self, name: &str) -> Result<PipelinesFile, PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.load_locked(&mut state)?;
        let mut file = state.cache.clone().unwrap_or_default();
        if file.pipelines.remove(name).is_none() {
            return Err(PipelineError::UnknownPipeline(name.to_string()));
        }
        if file.default.as_deref() == Some(name) {
            file.default = file.pipelines.keys().next().cloned();
        }
        self.write_locked(&mut state, file.clone())?;
        Ok(file)
    }

    /// Sets the default pipeline name.
    pub fn set_default(&self, name: &str) -> Result<PipelinesFile, PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.load_locked(&mut state)?;
        let mut file = state.cache.clone().unwrap_or_default();
        if !file.pipelines.contains_key(name) {
            return Err(PipelineError::UnknownPipeline(name.to_string()));
        }
        file.default = Some(name.to_string());
        self.write_locked(&mut state, file.clone())?;
        Ok(file)
    }

    /// Forces a reload from disk.
    pub fn refresh(&self) -> Result<PipelinesFile, PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.cache = None;
        self.load_locked(&mut state)?;
        Ok(state.cache.clone().unwrap_or_default())
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    fn load_locked(&self, state: &mut ManagerState) -> Result<(), PipelineError> {
        let raw: serde_yaml::Value = if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            serde_yaml::from_str(&content)?
        } else {
            serde_yaml::Value::Null
        };
        let resolved = resolve_env(raw);
        let mut file: PipelinesFile = if resolved.is_null() {
            PipelinesFile::default()
        } else {
            serde_yaml::from_value(resolved)?
        };

        for (name, pipeline) in file.pipelines.iter_mut() {
            pipeline.normalize_and_validate().map_err(|e| {
                PipelineError::Config(format!("pipeline '{name}': {e}"))
            })?;
        }

        // Empty file: synthesize and persist the default pipeline.
        if file.pipelines.is_empty() {
            info!(path = %self.path.display(), "no pipelines on disk, creating default");
            file.pipelines
                .insert(DEFAULT_PIPELINE_NAME.to_string(), PipelineConfig::default());
            file.default = Some(DEFAULT_PIPELINE_NAME.to_string());
            self.write_locked(state, file)?;
            return Ok(());
        }
        if file.default.is_none() {
            file.default = if file.pipelines.contains_key(DEFAULT_PIPELINE_NAME) {
                Some(DEFAULT_PIPELINE_NAME.to_string())
            } else {
                file.pipelines.keys().next().cloned()
            };
            self.write_locked(state, file)?;
            return Ok(());
        }

        state.cache = Some(file);
        state.last_mtime = self.mtime();
        Ok(())
    }

    fn write_locked(
        &self,
        state: &mut ManagerState,
        file: PipelinesFile,
    ) -> Result<(), PipelineError> {
        let content = serde_yaml::to_string(&file)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        state.cache = Some(file);
        state.last_mtime = self.mtime();
        Ok(())
    }
}

/// Recursively replaces `env:NAME` values and `${NAME}` substrings with
/// environment values (missing variables become empty strings).
fn resolve_env(value: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, resolve_env(v)))
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(resolve_env).collect()),
        Value::String(s) => Value::String(resolve_env_string(&s)),
        other => other,
    }
}

fn resolve_env_string(value: &str) -> String {
    if let Some(name) = value.strip_prefix(ENV_PREFIX) {
        return std::env::var(name.trim()).unwrap_or_else(|_| {
            warn!(variable = name.trim(), "env placeholder not set");
            String::new()
        });
    }

    let mut result = String::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        match rest[start..].find('}') {
            None => {
                // No closing brace: keep the remainder as-is.
                result.push_str(&rest[start..]);
                return result;
            }
            Some(end_offset) => {
                let name = rest[start + 2..start + end_offset].trim();
                result.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + end_offset + 1..];
            }
        }
    }
    result.push_str(rest);
    result
}
