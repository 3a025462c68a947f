//! Central function registry: one name → callable map over in-process and
//! remote tools, with an enabled set and per-function config.
//!
//! Reads are frequent (every turn builds the LLM tool list) and mutations
//! rare (admin enable/disable), so the whole state sits behind one
//! `tokio::sync::RwLock`. Only the enabled set and per-function config are
//! persisted; the handler catalogue is rebuilt at startup by the container.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::tools::{Tool, ToolCallContext, ToolSourceError, ToolSpec};

/// Where a function executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Handler runs in this process.
    InProcess,
    /// Handler lives behind a tool-server session.
    Remote,
}

/// Registry errors (admin operations and persistence).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("function not found: {0}")]
    NotFound(String),
    #[error("read registry config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse registry config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

struct RegisteredFunction {
    tool: Arc<dyn Tool>,
    kind: FunctionKind,
    enabled: bool,
    config: Option<Value>,
}

/// Admin-facing view of one registered function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: Option<String>,
    pub kind: FunctionKind,
    pub enabled: bool,
    pub config: Option<Value>,
}

#[derive(Default)]
struct Inner {
    functions: HashMap<String, RegisteredFunction>,
    enabled: HashSet<String>,
}

/// Persisted shape: only the enabled set and per-function configs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedFile {
    #[serde(default)]
    functions: PersistedFunctions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedFunctions {
    #[serde(default)]
    enabled: Vec<String>,
    #[serde(default)]
    configs: HashMap<String, Value>,
}

/// Unified registry for in-process functions and remote tool handles.
///
/// Invariant: a disabled function is never returned by
/// [`definitions_for_llm`](Self::definitions_for_llm) and never callable
/// through [`call`](Self::call).
pub struct FunctionRegistry {
    inner: RwLock<Inner>,
    config_path: Option<PathBuf>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config_path: None,
        }
    }

    /// Registry that persists enabled state and configs to `path`.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config_path: Some(path.into()),
        }
    }

    /// Registers (or replaces) a function.
    pub async fn register(
        &self,
        tool: Arc<dyn Tool>,
        kind: FunctionKind,
        enabled: bool,
        config: Option<Value>,
    ) {
        let name = tool.name().to_string();
        let mut inner = self.inner.write().await;
        if enabled {
            inner.enabled.insert(name.clone());
        } else {
            inner.enabled.remove(&name);
        }
        info!(function = %name, kind = ?kind, enabled, "registered function");
        inner.functions.insert(
            name,
            RegisteredFunction {
                tool,
                kind,
                enabled,
                config,
            },
        );
    }

    /// Enables a function; unknown names are an error.
    pub async fn enable(&self, name: &str) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        match inner.functions.get_mut(name) {
            Some(f) => {
                f.enabled = true;
                inner.enabled.insert(name.to_string());
                info!(function = %name, "enabled function");
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Disables a function; unknown names are an error.
    pub async fn disable(&self, name: &str) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        match inner.functions.get_mut(name) {
            Some(f) => {
                f.enabled = false;
                inner.enabled.remove(name);
                info!(function = %name, "disabled function");
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.inner.read().await.enabled.contains(name)
    }

    /// Updates the stored per-function config; unknown names are an error.
    pub async fn set_config(&self, name: &str, config: Value) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        match inner.functions.get_mut(name) {
            Some(f) => {
                f.config = Some(config);
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Calls an enabled function with the given arguments and context.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<Value, ToolSourceError> {
        let tool = {
            let inner = self.inner.read().await;
            let f = inner
                .functions
                .get(name)
                .ok_or_else(|| ToolSourceError::NotFound(name.to_string()))?;
            if !f.enabled {
                return Err(ToolSourceError::Disabled(name.to_string()));
            }
            Arc::clone(&f.tool)
        };
        tool.call(args, ctx).await
    }

    /// Tool definitions for the LLM: enabled functions only, stable order by name.
    pub async fn definitions_for_llm(&self) -> Vec<ToolSpec> {
        let inner = self.inner.read().await;
        let mut specs: Vec<ToolSpec> = inner
            .functions
            .values()
            .filter(|f| f.enabled)
            .map(|f| f.tool.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Admin view of every registered function, stable order by name.
    pub async fn list(&self) -> Vec<FunctionInfo> {
        let inner = self.inner.read().await;
        let mut infos: Vec<FunctionInfo> = inner
            .functions
            .values()
            .map(|f| FunctionInfo {
                name: f.tool.name().to_string(),
                description: f.tool.spec().description,
                kind: f.kind,
                enabled: f.enabled,
                config: f.config.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Per-function config, if any.
    pub async fn config_of(&self, name: &str) -> Option<Value> {
        self.inner
            .read()
            .await
            .functions
            .get(name)
            .and_then(|f| f.config.clone())
    }

    /// Loads the persisted enabled set and configs, applying them over the
    /// registered catalogue. Names not registered are skipped with a warning
    /// (the handler catalogue is rebuilt in code, not from the file).
    pub async fn load_from_yaml(&self) -> Result<(), RegistryError> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            warn!(path = %path.display(), "function config file not found, keeping defaults");
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        let parsed: PersistedFile = serde_yaml::from_str(&content)?;

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        // The file's enabled list is authoritative: everything else is off.
        for f in inner.functions.values_mut() {
            f.enabled = false;
        }
        inner.enabled.clear();
        for name in parsed.functions.enabled {
            match inner.functions.get_mut(&name) {
                Some(f) => {
                    f.enabled = true;
                    inner.enabled.insert(name);
                }
                None => warn!(function = %name, "function in config not registered, skipping"),
            }
        }
        for (name, config) in parsed.functions.configs {
            match inner.functions.get_mut(&name) {
                Some(f) => f.config = Some(config),
                None => warn!(function = %name, "config for unregistered function, skipping"),
            }
        }
        info!(path = %path.display(), "loaded function registry config");
        Ok(())
    }

    /// Persists the enabled set and per-function configs atomically
    /// (temp file in the same directory, then rename).
    pub async fn save_to_yaml(&self) -> Result<(), RegistryError> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        let persisted = {
            let inner = self.inner.read().await;
            let mut enabled: Vec<String> = inner.enabled.iter().cloned().collect();
            enabled.sort();
            let configs = inner
                .functions
                .iter()
                .filter_map(|(name, f)| f.config.clone().map(|c| (name.clone(), c)))
                .collect();
            PersistedFile {
                functions: PersistedFunctions { enabled, configs },
            }
        };
        let content = serde_yaml::to_string(&persisted)?;
        write_atomic(&path, &content)?;
        info!(path = %path.display(), "saved function registry config");
        Ok(())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `content` to `path` via a temp file in the same directory + rename,
/// so readers never observe a partially-written file.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: Some(format!("echo tool {}", self.name)),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            args: Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<Value, ToolSourceError> {
            Ok(args)
        }
    }

    async fn registry_with(names: &[(&str, bool)]) -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        for (name, enabled) in names {
            registry
                .register(
                    Arc::new(EchoTool {
                        name: name.to_string(),
                    }),
                    FunctionKind::InProcess,
                    *enabled,
                    None,
                )
                .await;
        }
        registry
    }

    /// **Scenario**: a disabled function is invisible to the LLM and not callable.
    #[tokio::test]
    async fn disabled_function_is_invisible_and_uncallable() {
        let registry = registry_with(&[("on", true), ("off", false)]).await;

        let defs = registry.definitions_for_llm().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "on");

        let err = registry.call("off", serde_json::json!({}), None).await;
        assert!(matches!(err, Err(ToolSourceError::Disabled(n)) if n == "off"));
    }

    /// **Scenario**: enable then disable restores the original enabled set.
    #[tokio::test]
    async fn enable_disable_roundtrip_is_identity() {
        let registry = registry_with(&[("a", false)]).await;
        assert!(!registry.is_enabled("a").await);
        registry.enable("a").await.unwrap();
        assert!(registry.is_enabled("a").await);
        registry.disable("a").await.unwrap();
        assert!(!registry.is_enabled("a").await);
        assert!(registry.definitions_for_llm().await.is_empty());
    }

    /// **Scenario**: enable/disable of an unknown name fails.
    #[tokio::test]
    async fn unknown_name_errors() {
        let registry = registry_with(&[]).await;
        assert!(matches!(
            registry.enable("nope").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.disable("nope").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.call("nope", serde_json::json!({}), None).await,
            Err(ToolSourceError::NotFound(_))
        ));
    }

    /// **Scenario**: save/load round-trips enabled set and configs; the file's
    /// enabled list is authoritative on load.
    #[tokio::test]
    async fn yaml_roundtrip_preserves_enabled_and_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("functions.yaml");

        let registry = FunctionRegistry::with_config_path(&path);
        registry
            .register(
                Arc::new(EchoTool { name: "a".into() }),
                FunctionKind::InProcess,
                true,
                Some(serde_json::json!({"timeout": 30})),
            )
            .await;
        registry
            .register(
                Arc::new(EchoTool { name: "b".into() }),
                FunctionKind::InProcess,
                false,
                None,
            )
            .await;
        registry.save_to_yaml().await.unwrap();

        // Fresh registry with inverted defaults; the file wins.
        let reloaded = FunctionRegistry::with_config_path(&path);
        reloaded
            .register(
                Arc::new(EchoTool { name: "a".into() }),
                FunctionKind::InProcess,
                false,
                None,
            )
            .await;
        reloaded
            .register(
                Arc::new(EchoTool { name: "b".into() }),
                FunctionKind::InProcess,
                true,
                None,
            )
            .await;
        reloaded.load_from_yaml().await.unwrap();

        assert!(reloaded.is_enabled("a").await);
        assert!(!reloaded.is_enabled("b").await);
        assert_eq!(
            reloaded.config_of("a").await,
            Some(serde_json::json!({"timeout": 30}))
        );
    }

    /// **Scenario**: names in the file that are not registered are skipped.
    #[tokio::test]
    async fn unknown_names_in_file_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("functions.yaml");
        std::fs::write(
            &path,
            "functions:\n  enabled: [ghost, a]\n  configs:\n    ghost: {x: 1}\n",
        )
        .unwrap();

        let registry = FunctionRegistry::with_config_path(&path);
        registry
            .register(
                Arc::new(EchoTool { name: "a".into() }),
                FunctionKind::InProcess,
                false,
                None,
            )
            .await;
        registry.load_from_yaml().await.unwrap();
        assert!(registry.is_enabled("a").await);
        assert!(!registry.is_enabled("ghost").await);
    }

    /// **Scenario**: call passes parsed args through to the handler.
    #[tokio::test]
    async fn call_dispatches_with_args() {
        let registry = registry_with(&[("echo", true)]).await;
        let out = registry
            .call("echo", serde_json::json!({"k": "v"}), None)
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"k": "v"}));
    }
}
