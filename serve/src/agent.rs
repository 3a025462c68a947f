//! Agent endpoints: streaming chat (SSE) and title generation.

use std::convert::Infallible;
use std::sync::Arc;

use atlas::chat::WireMessage;
use atlas::ChatRequest;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::app::AppState;

/// POST /agent/message/stream — streams chat events as SSE
/// (`data: <json>\n\n` per event).
pub(crate) async fn message_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        session_id = request.session_id.as_deref().unwrap_or(""),
        has_history = request.messages.is_some(),
        "chat stream request"
    );
    let chat = Arc::clone(&*state.chat.read().await);
    let events = chat.chat_stream(request);
    let stream = ReceiverStream::new(events).map(|event| {
        let data = event
            .to_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "{\"type\":\"error\",\"content\":\"serialization failed\"}".into());
        Ok(Event::default().data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateTitleRequest {
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerateTitleResponse {
    pub title: String,
}

/// POST /agent/generate-title — concise 3-6 word conversation title.
pub(crate) async fn generate_title(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateTitleRequest>,
) -> Json<GenerateTitleResponse> {
    let chat = Arc::clone(&*state.chat.read().await);
    let title = chat.generate_title(&request.messages).await;
    Json(GenerateTitleResponse { title })
}
