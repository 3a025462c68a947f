//! Dependency wiring: build every service once and share `Arc`s.
//!
//! The chat orchestrator holds the registry; the registry's knowledge tool
//! calls back into the RAG engine which shares the orchestrator's LLM
//! client. Building everything here keeps that cycle explicit and keeps
//! services free of globals.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::chat::ChatService;
use crate::llm::{ChatOpenAI, LlmClient};
use crate::rag::{RagConfig, RagError, RagOrchestrator, SourceConfig};
use crate::tools::{
    FaqTool, FunctionKind, FunctionRegistry, KnowledgeSearchTool, RegistryError,
};
use crate::transport::{RemoteTool, ServerSpec, ToolServerSession};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_PROMPT_TEMPLATE: &str = "You are a helpful travel assistant. Help users plan \
trips and answer travel-related questions. Use the available tools to look up information \
before answering; never invent facts a tool could verify.\n\nAvailable tools:\n{tools}";

/// Errors while building the container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("rag setup failed: {0}")]
    Rag(#[from] RagError),
    #[error("registry setup failed: {0}")]
    Registry(#[from] RegistryError),
}

/// Everything needed to build one service graph.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Chat model name (env `ATLAS_MODEL` overrides the default).
    pub model: String,
    /// System prompt template with optional `{tools}` placeholder.
    pub prompt_template: String,
    /// Path of the persisted function-registry YAML; `None` disables
    /// persistence.
    pub functions_config_path: Option<PathBuf>,
    /// RAG engine configuration.
    pub rag: RagConfig,
    /// Tool servers to launch and register.
    pub tool_servers: Vec<ServerSpec>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let mut rag = RagConfig::default();
        rag.sources = vec![SourceConfig {
            url: std::env::var("RETRIEVAL_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            ..SourceConfig::default()
        }];
        Self {
            model: std::env::var("ATLAS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            functions_config_path: None,
            rag,
            tool_servers: Vec::new(),
        }
    }
}

/// The built service graph.
pub struct Container {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<FunctionRegistry>,
    pub chat: Arc<ChatService>,
    pub rag: Arc<RagOrchestrator>,
    pub prompt_template: Arc<RwLock<String>>,
    sessions: Vec<Arc<ToolServerSession>>,
}

impl Container {
    /// Builds with the default OpenAI-compatible chat client.
    pub async fn build(config: ContainerConfig) -> Result<Self, ContainerError> {
        let llm: Arc<dyn LlmClient> = Arc::new(ChatOpenAI::new(config.model.clone()));
        Self::build_with_llm(config, llm).await
    }

    /// Builds with an injected LLM client (tests, alternative providers).
    pub async fn build_with_llm(
        config: ContainerConfig,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, ContainerError> {
        let registry = Arc::new(match &config.functions_config_path {
            Some(path) => FunctionRegistry::with_config_path(path),
            None => FunctionRegistry::new(),
        });

        let rag = Arc::new(RagOrchestrator::new(
            config.rag.clone(),
            Some(Arc::clone(&llm)),
        )?);

        // In-process catalogue. FAQ is on by default; knowledge search stays
        // off until enabled through the admin surface.
        registry
            .register(Arc::new(FaqTool::new()), FunctionKind::InProcess, true, None)
            .await;
        let knowledge_config = config.rag.sources.first().map(|s| {
            json!({
                "api_url": s.url,
                "pipeline_name": s.pipeline_name,
                "timeout": s.timeout_secs,
                "strategy": config.rag.strategy.as_str(),
            })
        });
        registry
            .register(
                Arc::new(KnowledgeSearchTool::new(Arc::clone(&rag))),
                FunctionKind::InProcess,
                false,
                knowledge_config,
            )
            .await;

        // Tool servers: a failing server is skipped, the rest keep loading.
        let mut sessions = Vec::new();
        for spec in &config.tool_servers {
            let session = Arc::new(ToolServerSession::new(spec.clone()));
            match RemoteTool::for_session(Arc::clone(&session)).await {
                Ok(tools) => {
                    info!(
                        server = session.id(),
                        tool_count = tools.len(),
                        "registered tool server"
                    );
                    for tool in tools {
                        registry
                            .register(Arc::new(tool), FunctionKind::Remote, true, None)
                            .await;
                    }
                    sessions.push(session);
                }
                Err(e) => {
                    error!(server = spec.id.as_str(), error = %e, "failed to load tool server, skipping");
                }
            }
        }

        // The persisted file overrides the in-code defaults.
        registry.load_from_yaml().await?;

        let prompt_template = Arc::new(RwLock::new(config.prompt_template.clone()));
        let chat = Arc::new(ChatService::new(
            Arc::clone(&llm),
            Arc::clone(&registry),
            Arc::clone(&prompt_template),
        ));

        Ok(Self {
            llm,
            registry,
            chat,
            rag,
            prompt_template,
            sessions,
        })
    }

    /// Current system prompt template.
    pub async fn get_prompt_template(&self) -> String {
        self.prompt_template.read().await.clone()
    }

    /// Replaces the system prompt template (hot reload: the next turn uses it).
    pub async fn set_prompt_template(&self, template: String) {
        *self.prompt_template.write().await = template;
        info!("system prompt template updated");
    }

    /// Closes every tool-server session. Tolerates partial state.
    pub async fn shutdown(&self) {
        for session in &self.sessions {
            session.close().await;
        }
        info!("container shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn test_config() -> ContainerConfig {
        ContainerConfig {
            model: "test-model".into(),
            tool_servers: vec![],
            ..ContainerConfig::default()
        }
    }

    /// **Scenario**: the default build registers FAQ enabled and knowledge
    /// search disabled.
    #[tokio::test]
    async fn default_build_registers_in_process_tools() {
        let container = Container::build_with_llm(test_config(), Arc::new(MockLlm::new(vec![])))
            .await
            .unwrap();

        assert!(container.registry.is_enabled("faq_search").await);
        assert!(!container.registry.is_enabled("knowledge_search").await);

        let defs = container.registry.definitions_for_llm().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "faq_search");
    }

    /// **Scenario**: a tool server that fails to spawn is skipped without
    /// failing the build.
    #[tokio::test]
    async fn failing_tool_server_is_skipped() {
        let mut config = test_config();
        config.tool_servers = vec![ServerSpec {
            id: "ghost".into(),
            command: "_nonexistent_command_xyz_".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
            stderr_verbose: false,
        }];
        let container = Container::build_with_llm(config, Arc::new(MockLlm::new(vec![])))
            .await
            .unwrap();
        assert!(container.registry.is_enabled("faq_search").await);
        container.shutdown().await;
    }

    /// **Scenario**: prompt template updates are visible to readers.
    #[tokio::test]
    async fn prompt_template_hot_swaps() {
        let container = Container::build_with_llm(test_config(), Arc::new(MockLlm::new(vec![])))
            .await
            .unwrap();
        container.set_prompt_template("New template {tools}".into()).await;
        assert_eq!(
            container.get_prompt_template().await,
            "New template {tools}"
        );
    }
}
