//! Atlas: tool-augmented streaming chat over a multi-source RAG core.
//!
//! The crate is organized around three load-bearing pieces:
//!
//! - [`chat`] — the streaming chat orchestrator: an iterated stream-decode
//!   loop that interleaves token output, in-stream tool-call assembly, tool
//!   dispatch, and response continuation.
//! - [`rag`] — the retrieval-augmented-generation engine: pluggable
//!   strategies over retrieval sources with query rewriting, guardrails,
//!   caching, and error-tolerant fallback.
//! - [`retrieval`] — the retrieval service core: parallel embedding fan-out
//!   over a vector store, dedup, optional rerank and LLM filter stages.
//!
//! Supporting layers: [`llm`] (provider abstraction), [`tools`] (function
//! registry unifying in-process and remote tools), [`transport`] (persistent
//! stdio sessions to tool-server subprocesses), and [`container`] (one-shot
//! dependency wiring for the services).

pub mod chat;
pub mod container;
pub mod llm;
pub mod message;
pub mod rag;
pub mod retrieval;
pub mod tools;
pub mod transport;

pub use chat::{ChatRequest, ChatService};
pub use container::{Container, ContainerConfig};
pub use llm::{ChatOpenAI, LlmClient, LlmError, LlmResponse, LlmUsage, MockLlm, ToolChoiceMode};
pub use message::{Message, Role, ToolCall};
pub use rag::{RagConfig, RagError, RagOrchestrator, RetrievalResult};
pub use retrieval::{PipelineConfig, RetrievalService};
pub use tools::{FunctionRegistry, Tool, ToolCallContext, ToolSourceError, ToolSpec};
pub use transport::{ToolServerSession, TransportError};
