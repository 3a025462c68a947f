//! Streaming chat orchestrator.
//!
//! One turn is an iterated loop (capped at `MAX_TOOL_ITERATIONS`): open a
//! streaming completion, fold its deltas (text chunks stream to the client
//! until the first tool-call fragment latches; later text is discarded so
//! prefaces the model will repeat after the tool result never leak), then
//! either finish on plain text or execute the assembled calls and re-enter
//! the loop with the assistant+tool messages appended.
//!
//! Events flow through a bounded channel: a slow consumer blocks the loop at
//! send (backpressure), a dropped consumer fails the send and cancels the
//! turn cooperatively. The stream always terminates with `done` (or `error`
//! for request-level failures); provider errors surface as one formatted
//! chunk.

use std::sync::Arc;

use stream_event::ChatEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::chat::assembly::ToolCallAssembler;
use crate::chat::executor::{StreamClosed, ToolExecutor};
use crate::chat::formatter::{
    check_tools_used_but_no_info, response_suggests_fallback_contact, NO_INFO_SUGGESTION,
};
use crate::chat::{ChatRequest, MessageProcessor, WireMessage};
use crate::llm::{CompletionOptions, LlmClient, LlmError, StreamDelta};
use crate::message::Message;
use crate::tools::FunctionRegistry;

/// Hard cap on tool-calling iterations per turn.
const MAX_TOOL_ITERATIONS: usize = 4;
/// Event queue capacity; bounds buffering towards slow SSE consumers.
const EVENT_QUEUE_CAPACITY: usize = 64;
/// Delta queue capacity between the provider task and the fold loop.
const DELTA_QUEUE_CAPACITY: usize = 64;

const GREETING: &str = "Hello! I'm your travel assistant. I can help you plan trips, answer \
travel questions, and look up destination information. How can I help?";
const EMPTY_REPLY_APOLOGY: &str =
    "Sorry, I couldn't get a response from the model. Please check your connection and try again.";
const GENERIC_APOLOGY: &str =
    "Sorry, something went wrong while processing your request. Please try again.";
const ITERATION_CAP_APOLOGY: &str =
    "Sorry, I couldn't finish the request within the allowed number of tool steps. Please try again.";

const MAX_TITLE_CHARS: usize = 60;
const TITLE_SNIPPET_MESSAGES: usize = 4;
const TITLE_SNIPPET_CHARS: usize = 200;

/// The tool-augmented streaming chat service.
#[derive(Clone)]
pub struct ChatService {
    llm: Arc<dyn LlmClient>,
    registry: Arc<FunctionRegistry>,
    executor: Arc<ToolExecutor>,
    processor: MessageProcessor,
    prompt_template: Arc<RwLock<String>>,
}

impl ChatService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<FunctionRegistry>,
        prompt_template: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            executor: Arc::new(ToolExecutor::new(Arc::clone(&registry))),
            llm,
            registry,
            processor: MessageProcessor::new(),
            prompt_template,
        }
    }

    /// Streams one chat turn. The returned receiver yields chunks, tool
    /// lifecycle events, and a terminal `done`/`error`; dropping it cancels
    /// the turn at the next event.
    pub fn chat_stream(&self, request: ChatRequest) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let service = self.clone();
        tokio::spawn(async move {
            let _ = service.run_turn(request, tx).await;
        });
        rx
    }

    async fn run_turn(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<(), StreamClosed> {
        let conversation = self.processor.prepare_messages(&request);
        if conversation.is_empty() {
            send(&tx, ChatEvent::Chunk { content: GREETING.into() }).await?;
            send(&tx, ChatEvent::Done).await?;
            return Ok(());
        }

        let tools = self.registry.definitions_for_llm().await;
        let template = self.prompt_template.read().await.clone();
        let system_prompt = self.processor.build_system_prompt(&template, &tools);

        match self
            .run_iterations(conversation, system_prompt, tools, &tx)
            .await
        {
            Ok(()) => send(&tx, ChatEvent::Done).await,
            Err(TurnError::StreamClosed) => Err(StreamClosed),
            Err(TurnError::Fatal(message)) => {
                // Request-level failure before anything useful streamed.
                send(&tx, ChatEvent::Error { content: message }).await?;
                Ok(())
            }
        }
    }

    async fn run_iterations(
        &self,
        mut conversation: Vec<Message>,
        system_prompt: String,
        tools: Vec<crate::tools::ToolSpec>,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), TurnError> {
        let mut accumulated_content = String::new();
        let mut assembly_failures = 0u32;
        let mut finished_with_text = false;
        let mut iteration = 0;

        while iteration < MAX_TOOL_ITERATIONS {
            iteration += 1;
            info!(iteration, max = MAX_TOOL_ITERATIONS, "chat iteration");

            let mut all_messages = Vec::with_capacity(conversation.len() + 1);
            all_messages.push(Message::system(system_prompt.clone()));
            all_messages.extend(conversation.iter().cloned());

            let opts = CompletionOptions::with_tools(tools.clone());
            let mut assembler = ToolCallAssembler::new(iteration);
            let mut accumulated_text = String::new();

            let outcome = self
                .fold_stream(
                    &all_messages,
                    &opts,
                    &mut assembler,
                    &mut accumulated_text,
                    &mut accumulated_content,
                    tx,
                )
                .await;
            match outcome {
                Ok(()) => {}
                Err(FoldError::Closed) => return Err(TurnError::StreamClosed),
                Err(FoldError::Llm(e)) => {
                    // Provider errors end the turn as one formatted chunk.
                    error!(error = %e, "llm streaming failed");
                    send(tx, ChatEvent::Chunk {
                        content: format!("Error processing request: {e}"),
                    })
                    .await
                    .map_err(|_| TurnError::StreamClosed)?;
                    return Ok(());
                }
            }

            if assembler.detected() {
                match assembler.finish() {
                    Some(calls) => {
                        info!(count = calls.len(), "executing tool calls");
                        conversation.push(Message::assistant_with_tools(
                            accumulated_text.clone(),
                            calls.clone(),
                        ));
                        self.executor
                            .execute(&calls, &mut conversation, tx)
                            .await
                            .map_err(|_| TurnError::StreamClosed)?;
                        // Next iteration sees assistant + tool results.
                        continue;
                    }
                    None => {
                        warn!("tool call detected but never completed");
                        send(tx, ChatEvent::ToolCallError {
                            tool: "unknown".into(),
                            tool_call_id: String::new(),
                            error: "tool call detected but arguments never completed".into(),
                        })
                        .await
                        .map_err(|_| TurnError::StreamClosed)?;
                        assembly_failures += 1;
                        if assembly_failures >= 2 {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !accumulated_text.is_empty() {
                if iteration > 1
                    && check_tools_used_but_no_info(&conversation)
                    && !response_suggests_fallback_contact(&accumulated_content)
                {
                    send(tx, ChatEvent::Chunk {
                        content: NO_INFO_SUGGESTION.into(),
                    })
                    .await
                    .map_err(|_| TurnError::StreamClosed)?;
                }
                finished_with_text = true;
                break;
            }

            // Neither text nor tool calls arrived.
            warn!(iteration, "stream produced no content and no tool calls");
            if iteration == 1 {
                finished_with_text = self.fallback_stream(&all_messages, tx).await?;
                break;
            }
            send(tx, ChatEvent::Chunk {
                content: GENERIC_APOLOGY.into(),
            })
            .await
            .map_err(|_| TurnError::StreamClosed)?;
            finished_with_text = true;
            break;
        }

        if !finished_with_text && iteration >= MAX_TOOL_ITERATIONS {
            warn!(max = MAX_TOOL_ITERATIONS, "reached tool iteration cap");
            send(tx, ChatEvent::Chunk {
                content: ITERATION_CAP_APOLOGY.into(),
            })
            .await
            .map_err(|_| TurnError::StreamClosed)?;
        }
        Ok(())
    }

    /// Consumes one provider stream, emitting text chunks until a tool-call
    /// fragment latches and folding every fragment into the assembler.
    async fn fold_stream(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
        assembler: &mut ToolCallAssembler,
        accumulated_text: &mut String,
        accumulated_content: &mut String,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), FoldError> {
        let (delta_tx, mut delta_rx) = mpsc::channel::<StreamDelta>(DELTA_QUEUE_CAPACITY);
        let llm = Arc::clone(&self.llm);
        let messages_owned = messages.to_vec();
        let opts_owned = opts.clone();
        let llm_task = tokio::spawn(async move {
            llm.invoke_stream(&messages_owned, &opts_owned, delta_tx).await
        });

        while let Some(delta) = delta_rx.recv().await {
            if !delta.tool_calls.is_empty() {
                assembler.absorb(&delta.tool_calls);
            }
            if let Some(content) = delta.content {
                if assembler.detected() {
                    // Text after detection is preface the model will repeat
                    // once it has the tool result.
                    continue;
                }
                accumulated_text.push_str(&content);
                accumulated_content.push_str(&content);
                if send(tx, ChatEvent::Chunk { content }).await.is_err() {
                    llm_task.abort();
                    return Err(FoldError::Closed);
                }
            }
        }

        match llm_task.await {
            Ok(Ok(_response)) => Ok(()),
            Ok(Err(e)) => Err(FoldError::Llm(e)),
            Err(join_error) => Err(FoldError::Llm(LlmError::Stream(join_error.to_string()))),
        }
    }

    /// One retry without tools when the first iteration produced nothing;
    /// streams the reply directly. Returns whether any text was emitted.
    async fn fallback_stream(
        &self,
        messages: &[Message],
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<bool, TurnError> {
        info!("retrying completion without tools");
        let opts = CompletionOptions::default();
        let (delta_tx, mut delta_rx) = mpsc::channel::<StreamDelta>(DELTA_QUEUE_CAPACITY);
        let llm = Arc::clone(&self.llm);
        let messages_owned = messages.to_vec();
        let llm_task = tokio::spawn(async move {
            llm.invoke_stream(&messages_owned, &opts, delta_tx).await
        });

        let mut emitted = false;
        while let Some(delta) = delta_rx.recv().await {
            if let Some(content) = delta.content {
                if content.is_empty() {
                    continue;
                }
                emitted = true;
                if send(tx, ChatEvent::Chunk { content }).await.is_err() {
                    llm_task.abort();
                    return Err(TurnError::StreamClosed);
                }
            }
        }

        match llm_task.await {
            Ok(Ok(_)) if emitted => Ok(true),
            Ok(Ok(_)) => {
                warn!("fallback stream produced no content");
                send(tx, ChatEvent::Chunk {
                    content: EMPTY_REPLY_APOLOGY.into(),
                })
                .await
                .map_err(|_| TurnError::StreamClosed)?;
                Ok(true)
            }
            Ok(Err(e)) => {
                error!(error = %e, "fallback stream failed");
                send(tx, ChatEvent::Chunk {
                    content: format!("Error processing request: {e}"),
                })
                .await
                .map_err(|_| TurnError::StreamClosed)?;
                Ok(true)
            }
            Err(join_error) => Err(TurnError::Fatal(format!(
                "An unexpected error occurred: {join_error}"
            ))),
        }
    }

    /// Generates a concise 3-6 word title for a conversation.
    ///
    /// Falls back to a prefix of the first user message when the model call
    /// fails or returns nothing.
    pub async fn generate_title(&self, messages: &[WireMessage]) -> String {
        let snippet: Vec<String> = messages
            .iter()
            .take(TITLE_SNIPPET_MESSAGES)
            .map(|m| {
                let content: String = m
                    .content
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(TITLE_SNIPPET_CHARS)
                    .collect();
                format!("{}: {}", m.role.to_uppercase(), content)
            })
            .collect();

        let prompt = format!(
            "Based on the following conversation, generate a concise, descriptive title \
             in 3-6 words. The title should capture the main topic or question.\n\
             \n\
             Conversation:\n{}\n\
             \n\
             Requirements:\n\
             - 3-6 words maximum\n\
             - Clear and descriptive\n\
             - No quotes or special formatting\n\
             - In the same language as the conversation\n\
             \n\
             Title:",
            snippet.join("\n")
        );

        let title_messages = [Message::user(prompt)];
        match self
            .llm
            .invoke(&title_messages, &CompletionOptions::default())
            .await
        {
            Ok(response) => {
                let title = clean_title(&response.content);
                if title.is_empty() {
                    fallback_title(messages)
                } else {
                    info!(title = %title, "generated conversation title");
                    title
                }
            }
            Err(e) => {
                error!(error = %e, "title generation failed");
                fallback_title(messages)
            }
        }
    }
}

enum TurnError {
    StreamClosed,
    Fatal(String),
}

enum FoldError {
    Closed,
    Llm(LlmError),
}

async fn send(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), StreamClosed> {
    tx.send(event).await.map_err(|_| StreamClosed)
}

fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    for quote in ['"', '\''] {
        if title.len() >= 2 && title.starts_with(quote) && title.ends_with(quote) {
            title = &title[1..title.len() - 1];
        }
    }
    let title = title.trim();
    if title.chars().count() > MAX_TITLE_CHARS {
        let clipped: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{clipped}...")
    } else {
        title.to_string()
    }
}

fn fallback_title(messages: &[WireMessage]) -> String {
    messages
        .iter()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.as_deref())
        .map(|c| c.chars().take(30).collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "New chat".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlm, ScriptedTurn, StreamDelta, ToolCallFragment};
    use crate::tools::{FunctionKind, Tool, ToolCallContext, ToolSourceError, ToolSpec};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FaqStub {
        value: Value,
    }

    #[async_trait]
    impl Tool for FaqStub {
        fn name(&self) -> &str {
            "faq_search"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "faq_search".into(),
                description: Some("faq".into()),
                input_schema: json!({}),
            }
        }

        async fn call(
            &self,
            _args: Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<Value, ToolSourceError> {
            Ok(self.value.clone())
        }
    }

    async fn service_with(
        turns: Vec<ScriptedTurn>,
        faq_value: Option<Value>,
    ) -> ChatService {
        let registry = FunctionRegistry::new();
        if let Some(value) = faq_value {
            registry
                .register(
                    Arc::new(FaqStub { value }),
                    FunctionKind::InProcess,
                    true,
                    None,
                )
                .await;
        }
        ChatService::new(
            Arc::new(MockLlm::new(turns)),
            Arc::new(registry),
            Arc::new(RwLock::new("You are a travel assistant.".to_string())),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: Some(message.to_string()),
            ..ChatRequest::default()
        }
    }

    fn text_of(events: &[ChatEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// **Scenario** (plain chat): streamed chunks concatenate to the model's
    /// text, then done. No tool events without enabled tools.
    #[tokio::test]
    async fn plain_chat_streams_chunks_then_done() {
        let service = service_with(vec![ScriptedTurn::text(&["Hel", "lo!"])], None).await;
        let events = collect(service.chat_stream(request("hello"))).await;

        assert_eq!(text_of(&events), "Hello!");
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChatEvent::ToolCallStart { .. })));
    }

    /// **Scenario** (single tool call): start → end → answer chunks → done;
    /// the second iteration's text does not echo the tool arguments.
    #[tokio::test]
    async fn single_tool_call_roundtrip() {
        let service = service_with(
            vec![
                ScriptedTurn::tool_call("call_1", "faq_search", r#"{"query":"visa"}"#),
                ScriptedTurn::text(&["You need a visa."]),
            ],
            Some(json!({"answer": "Visas take 2-4 weeks.", "found": true})),
        )
        .await;
        let events = collect(service.chat_stream(request("visa"))).await;

        let mut kinds = events.iter();
        assert!(matches!(
            kinds.next(),
            Some(ChatEvent::ToolCallStart { tool, input, .. })
                if tool == "faq_search" && input["query"] == "visa"
        ));
        assert!(matches!(
            kinds.next(),
            Some(ChatEvent::ToolCallEnd { result, .. }) if result["answer"].is_string()
        ));
        assert_eq!(text_of(&events), "You need a visa.");
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
    }

    /// **Scenario** (tool returns not-found): the second iteration appends a
    /// single contact suggestion when the reply has none.
    #[tokio::test]
    async fn not_found_appends_contact_suggestion_once() {
        let service = service_with(
            vec![
                ScriptedTurn::tool_call("call_1", "faq_search", r#"{"query":"obscure"}"#),
                ScriptedTurn::text(&["I could not locate that in the FAQ."]),
            ],
            Some(json!({"answer": null, "found": false, "message": "No FAQ entry."})),
        )
        .await;
        let events = collect(service.chat_stream(request("obscure question"))).await;

        let text = text_of(&events);
        assert!(text.contains("contacting Harry"));
        assert_eq!(text.matches("Harry").count(), 1, "inserted exactly once");
    }

    /// **Scenario** (not-found but reply already suggests the contact): no
    /// duplicate insertion.
    #[tokio::test]
    async fn existing_contact_suggestion_not_duplicated() {
        let service = service_with(
            vec![
                ScriptedTurn::tool_call("call_1", "faq_search", r#"{"query":"x"}"#),
                ScriptedTurn::text(&["Nothing found; please contact Harry directly."]),
            ],
            Some(json!({"answer": null, "found": false})),
        )
        .await;
        let events = collect(service.chat_stream(request("x"))).await;
        assert_eq!(text_of(&events).matches("Harry").count(), 1);
    }

    /// **Scenario** (malformed tool arguments): one tool_call_error, then the
    /// loop advances and the next iteration streams a reply.
    #[tokio::test]
    async fn malformed_arguments_emit_error_and_continue() {
        let broken = ScriptedTurn {
            deltas: vec![StreamDelta {
                content: None,
                tool_calls: vec![ToolCallFragment {
                    index: Some(0),
                    id: Some("call_1".into()),
                    name: Some("faq_search".into()),
                    arguments: r#"{"query":"#.into(),
                }],
            }],
            error: None,
        };
        let service = service_with(
            vec![broken, ScriptedTurn::text(&["Let me answer directly."])],
            Some(json!({"answer": "unused"})),
        )
        .await;
        let events = collect(service.chat_stream(request("visa"))).await;

        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ChatEvent::ToolCallError { .. }))
                .count(),
            1
        );
        assert_eq!(text_of(&events), "Let me answer directly.");
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
    }

    /// **Scenario**: once a tool call is detected, same-stream text chunks
    /// are discarded (no chunk events after the first fragment).
    #[tokio::test]
    async fn text_after_detection_is_discarded() {
        let mixed = ScriptedTurn {
            deltas: vec![
                StreamDelta::text("Before"),
                StreamDelta {
                    content: None,
                    tool_calls: vec![ToolCallFragment {
                        index: Some(0),
                        id: Some("c".into()),
                        name: Some("faq_search".into()),
                        arguments: "{}".into(),
                    }],
                },
                StreamDelta::text("leaked preface"),
            ],
            error: None,
        };
        let service = service_with(
            vec![mixed, ScriptedTurn::text(&["Final answer."])],
            Some(json!({"answer": "a"})),
        )
        .await;
        let events = collect(service.chat_stream(request("q"))).await;

        let text = text_of(&events);
        assert!(text.contains("Before"));
        assert!(!text.contains("leaked preface"));
        assert!(text.contains("Final answer."));
    }

    /// **Scenario**: empty first stream triggers one fallback without tools;
    /// an empty fallback yields the apology chunk.
    #[tokio::test]
    async fn empty_streams_yield_apology() {
        let service = service_with(
            vec![ScriptedTurn::default(), ScriptedTurn::default()],
            None,
        )
        .await;
        let events = collect(service.chat_stream(request("hello"))).await;
        assert_eq!(text_of(&events), EMPTY_REPLY_APOLOGY);
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
    }

    /// **Scenario**: a provider error becomes one formatted chunk and the
    /// stream still terminates with done.
    #[tokio::test]
    async fn llm_error_becomes_single_chunk() {
        let service = service_with(vec![ScriptedTurn::error("rate limited")], None).await;
        let events = collect(service.chat_stream(request("hello"))).await;
        assert!(text_of(&events).contains("rate limited"));
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
    }

    /// **Scenario**: an empty request yields the greeting.
    #[tokio::test]
    async fn empty_request_greets() {
        let service = service_with(vec![], None).await;
        let events = collect(service.chat_stream(ChatRequest::default())).await;
        assert_eq!(text_of(&events), GREETING);
    }

    /// **Scenario**: the iteration cap yields an apology when the model
    /// keeps calling tools.
    #[tokio::test]
    async fn iteration_cap_apologizes() {
        let turns = (0..MAX_TOOL_ITERATIONS)
            .map(|_| ScriptedTurn::tool_call("c", "faq_search", "{}"))
            .collect();
        let service = service_with(turns, Some(json!({"answer": "a"}))).await;
        let events = collect(service.chat_stream(request("loop forever"))).await;
        assert!(text_of(&events).contains("allowed number of tool steps"));
        assert!(matches!(events.last(), Some(ChatEvent::Done)));
    }

    /// **Scenario**: title generation trims quotes and caps length; failures
    /// fall back to the first user message.
    #[tokio::test]
    async fn title_generation_and_fallback() {
        let service = service_with(
            vec![ScriptedTurn::text(&["\"Japan Visa Questions\""])],
            None,
        )
        .await;
        let messages = vec![WireMessage {
            role: "user".into(),
            content: Some("Do I need a visa for Japan?".into()),
        }];
        assert_eq!(service.generate_title(&messages).await, "Japan Visa Questions");

        let failing = service_with(vec![ScriptedTurn::error("down")], None).await;
        assert_eq!(
            failing.generate_title(&messages).await,
            "Do I need a visa for Japan?"
        );

        let empty = service_with(vec![], None).await;
        assert_eq!(empty.generate_title(&[]).await, "New chat");
    }
}
