//! OpenAI Chat Completions client implementing `LlmClient` (ChatOpenAI).
//!
//! Uses the OpenAI-compatible Chat Completions API via `async_openai`.
//! Requires `OPENAI_API_KEY` (or explicit config). Tools are attached per
//! call from [`CompletionOptions`]; when present, the API may return
//! `tool_calls` in the response.
//!
//! # Streaming
//!
//! `invoke_stream()` forwards every provider chunk as a [`StreamDelta`]:
//! `choices[0].delta.content` for incremental text and
//! `choices[0].delta.tool_calls` for indexed tool-call fragments. The legacy
//! single `function_call` delta shape is normalized into the same fragment
//! type with `index: None`, so downstream assembly handles one shape only.
//! The complete response is still accumulated and returned at the end.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use crate::llm::{
    CompletionOptions, LlmClient, LlmError, LlmResponse, LlmUsage, StreamDelta, ToolCallFragment,
    ToolChoiceMode,
};
use crate::message::{Message, ToolCall};
use crate::tools::ToolSpec;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        FunctionCall, FunctionObject, ToolChoiceOptions,
    },
    Client,
};

/// OpenAI Chat Completions client implementing `LlmClient`.
///
/// Uses `OPENAI_API_KEY` from the environment by default; or provide config
/// via [`ChatOpenAI::with_config`] (custom key, base URL, or any
/// OpenAI-compatible provider).
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl ChatOpenAI {
    /// Build client with default config (API key from `OPENAI_API_KEY` env).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            temperature: None,
        }
    }

    /// Build client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature: None,
        }
    }

    /// Set default temperature (0–2). Per-call options override this.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Model name this client completes with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the chat completions URL used for logging (base from
    /// OPENAI_BASE_URL or OPENAI_API_BASE env, else default). Does not append
    /// /v1 when base already ends with /v1.
    fn chat_completions_url() -> String {
        let base = std::env::var("OPENAI_BASE_URL")
            .or_else(|_| std::env::var("OPENAI_API_BASE"))
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Converts our `Message` list to OpenAI request messages, including
    /// assistant `tool_calls` and tool-result messages for loop re-entry.
    fn messages_to_request(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let converted = match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    args.content(content.as_str());
                    if !tool_calls.is_empty() {
                        let calls: Vec<ChatCompletionMessageToolCalls> = tool_calls
                            .iter()
                            .map(|tc| {
                                ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: tc.id.clone().unwrap_or_default(),
                                        function: FunctionCall {
                                            name: tc.name.clone(),
                                            arguments: tc.arguments.clone(),
                                        },
                                    },
                                )
                            })
                            .collect();
                        args.tool_calls(calls);
                    }
                    ChatCompletionRequestMessage::Assistant(
                        args.build().map_err(|e| LlmError::Request(e.to_string()))?,
                    )
                }
                Message::Tool {
                    tool_call_id,
                    content,
                    ..
                } => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content.as_str())
                        .tool_call_id(tool_call_id.as_str())
                        .build()
                        .map_err(|e| LlmError::Request(e.to_string()))?,
                ),
            };
            out.push(converted);
        }
        Ok(out)
    }

    /// Builds one completion request from messages and per-call options.
    ///
    /// This is the provider boundary: neutral [`ToolSpec`]s become OpenAI
    /// `tools` entries here, and [`ToolChoiceMode`] becomes `tool_choice`.
    fn build_request(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let openai_messages = Self::messages_to_request(messages)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);
        if stream {
            args.stream(true);
            // Do not set stream_options: some OpenAI-compatible proxies return
            // broken streams when it is present, and the final-chunk usage is
            // optional for us.
        }

        if !opts.tools.is_empty() {
            let chat_tools: Vec<ChatCompletionTools> = opts
                .tools
                .iter()
                .map(|t: &ToolSpec| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }

        if let Some(mode) = opts.tool_choice {
            let opt = match mode {
                ToolChoiceMode::Auto => ToolChoiceOptions::Auto,
                ToolChoiceMode::None => ToolChoiceOptions::None,
                ToolChoiceMode::Required => ToolChoiceOptions::Required,
            };
            args.tool_choice(ChatCompletionToolChoiceOption::Mode(opt));
        }

        if let Some(t) = opts.temperature.or(self.temperature) {
            args.temperature(t);
        }

        args.build().map_err(|e| LlmError::Request(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let request = self.build_request(messages, opts, false)?;
        let url = Self::chat_completions_url();
        debug!(
            trace_id = %trace_id,
            url = %url,
            model = %self.model,
            message_count = messages.len(),
            tools_count = opts.tools.len(),
            tool_choice = ?opts.tool_choice,
            "chat create"
        );
        if let Ok(js) = serde_json::to_string(&request) {
            trace!(trace_id = %trace_id, url = %url, request = %js, "chat request body");
        }

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Api("provider returned no choices".to_string()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        name: f.function.name,
                        arguments: f.function.arguments,
                        id: Some(f.id),
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }

    /// Streaming variant: forwards deltas as they arrive from the provider.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, LlmError> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let request = self.build_request(messages, opts, true)?;
        let url = Self::chat_completions_url();
        debug!(
            trace_id = %trace_id,
            url = %url,
            model = %self.model,
            message_count = messages.len(),
            stream = true,
            tools_count = opts.tools.len(),
            tool_choice = ?opts.tool_choice,
            "chat create_stream"
        );

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Stream(e.to_string()))?;

        // Accumulate content, tool calls, and usage while forwarding deltas.
        let mut full_content = String::new();
        // Tool calls accumulator: provider index -> (id, name, arguments).
        let mut tool_call_map: std::collections::HashMap<u32, (String, String, String)> =
            std::collections::HashMap::new();
        let mut stream_usage: Option<LlmUsage> = None;

        while let Some(result) = stream.next().await {
            let response = result.map_err(|e| LlmError::Stream(e.to_string()))?;

            if let Some(ref u) = response.usage {
                stream_usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }

            for choice in response.choices {
                let delta = &choice.delta;
                let mut out = StreamDelta::default();

                if let Some(ref content) = delta.content {
                    if !content.is_empty() {
                        full_content.push_str(content);
                        out.content = Some(content.clone());
                    }
                }

                if let Some(ref tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = tool_call_map.entry(tc.index).or_insert_with(|| {
                            (
                                tc.id.clone().unwrap_or_default(),
                                String::new(),
                                String::new(),
                            )
                        });
                        if let Some(ref id) = tc.id {
                            if !id.is_empty() {
                                entry.0 = id.clone();
                            }
                        }

                        let mut fragment = ToolCallFragment {
                            index: Some(tc.index),
                            id: tc.id.clone().filter(|s| !s.is_empty()),
                            name: None,
                            arguments: String::new(),
                        };
                        if let Some(ref func) = tc.function {
                            if let Some(ref name) = func.name {
                                entry.1.push_str(name);
                                fragment.name = Some(name.clone());
                            }
                            if let Some(ref args) = func.arguments {
                                entry.2.push_str(args);
                                fragment.arguments.push_str(args);
                            }
                        }
                        out.tool_calls.push(fragment);
                    }
                }

                if out.content.is_some() || !out.tool_calls.is_empty() {
                    // Send errors mean the consumer went away; keep
                    // accumulating so the returned response is complete.
                    let _ = delta_tx.send(out).await;
                }
            }
        }

        // Ordered by provider index so call order survives assembly.
        let mut indexed: Vec<(u32, (String, String, String))> = tool_call_map.into_iter().collect();
        indexed.sort_by_key(|(i, _)| *i);
        let tool_calls: Vec<ToolCall> = indexed
            .into_iter()
            .map(|(_, (id, name, arguments))| ToolCall {
                name,
                arguments,
                id: if id.is_empty() { None } else { Some(id) },
            })
            .collect();

        trace!(
            trace_id = %trace_id,
            url = %url,
            content_len = full_content.len(),
            tool_calls = tool_calls.len(),
            usage = ?stream_usage,
            "chat stream response"
        );

        Ok(LlmResponse {
            content: full_content,
            tool_calls,
            usage: stream_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use crate::message::Message;

    /// **Scenario**: builder chain constructs a client without panicking.
    #[test]
    fn chat_openai_builders() {
        let _ = ChatOpenAI::new("gpt-4o-mini");
        let config = OpenAIConfig::new().with_api_key("test-key");
        let _ = ChatOpenAI::with_config(config, "gpt-4o-mini").with_temperature(0.5f32);
    }

    /// **Scenario**: tool messages and assistant tool_calls convert to request
    /// messages without error (loop re-entry shape).
    #[test]
    fn messages_to_request_handles_tool_roles() {
        let messages = [
            Message::system("sys"),
            Message::user("q"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall::new(
                    Some("call_1".to_string()),
                    "faq_search",
                    r#"{"query":"visa"}"#,
                )],
            ),
            Message::tool("call_1", "faq_search", "result text"),
        ];
        let converted = ChatOpenAI::messages_to_request(&messages).unwrap();
        assert_eq!(converted.len(), 4);
    }

    /// **Scenario**: invoke() against an unreachable API base returns an error
    /// (no real API key needed).
    #[tokio::test]
    async fn invoke_with_unreachable_base_returns_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAI::with_config(config, "gpt-4o-mini");
        let messages = [Message::user("Hello")];

        let result = client.invoke(&messages, &CompletionOptions::default()).await;

        assert!(
            result.is_err(),
            "invoke against unreachable base should return Err"
        );
    }

    /// **Scenario**: invoke_stream() against an unreachable API base returns
    /// an error and sends nothing.
    #[tokio::test]
    async fn invoke_stream_with_unreachable_base_returns_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAI::with_config(config, "gpt-4o-mini");
        let messages = [Message::user("Hello")];
        let (tx, mut rx) = mpsc::channel(16);

        let result = client
            .invoke_stream(&messages, &CompletionOptions::default(), tx)
            .await;

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }
}
