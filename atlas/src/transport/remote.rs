//! Remote tool: one served tool exposed through the function registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolCallContext, ToolSourceError, ToolSpec};
use crate::transport::{ToolServerSession, TransportError};

/// Adapter from one tool-server descriptor to the [`Tool`] trait.
///
/// Many `RemoteTool`s may share one session; the session serializes its own
/// lifecycle, so the adapter is just name + spec + forwarding.
pub struct RemoteTool {
    session: Arc<ToolServerSession>,
    spec: ToolSpec,
}

impl RemoteTool {
    pub fn new(session: Arc<ToolServerSession>, spec: ToolSpec) -> Self {
        Self { session, spec }
    }

    /// Builds one adapter per cached descriptor of the session.
    pub async fn for_session(
        session: Arc<ToolServerSession>,
    ) -> Result<Vec<RemoteTool>, TransportError> {
        let specs = session.list_tools().await?;
        Ok(specs
            .into_iter()
            .map(|spec| RemoteTool::new(Arc::clone(&session), spec))
            .collect())
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<Value, ToolSourceError> {
        self.session
            .call_tool(&self.spec.name, args)
            .await
            .map_err(|e| ToolSourceError::Transport(e.to_string()))
    }
}
