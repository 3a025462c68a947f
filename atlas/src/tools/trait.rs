use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolCallContext, ToolSourceError, ToolSpec};

/// Represents a single tool that can be called by the LLM.
///
/// Each tool has a unique name, a specification (description and JSON
/// schema), and the call logic. Tools are registered with
/// [`crate::tools::FunctionRegistry`]; the registry enforces the
/// enabled/disabled state, so implementations only handle their own domain.
///
/// Results are JSON values rather than plain text: the chat-side result
/// formatter decides LLM framing from the value's shape (`answer`/`found`,
/// `results`, plain string, ...).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool, as exposed to the LLM.
    fn name(&self) -> &str;

    /// Specification for this tool: description and argument schema.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool.
    ///
    /// `args` is the parsed JSON arguments object; `ctx` carries the current
    /// conversation for tools that use it (ignored by the rest).
    async fn call(
        &self,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<Value, ToolSourceError>;
}
