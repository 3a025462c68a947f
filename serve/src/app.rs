//! Chat service app: state and router.

use std::sync::Arc;

use atlas::{ChatService, Container};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{admin, agent};

/// Active provider + model selection (admin-configurable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
        }
    }
}

/// Shared state of the chat service.
pub struct AppState {
    pub container: Arc<Container>,
    /// The live chat service; swapped when admin changes provider/model.
    pub chat: RwLock<Arc<ChatService>>,
    pub settings: RwLock<LlmSettings>,
}

impl AppState {
    pub fn new(container: Arc<Container>) -> Self {
        let chat = RwLock::new(Arc::clone(&container.chat));
        Self {
            container,
            chat,
            settings: RwLock::new(LlmSettings::default()),
        }
    }
}

/// Routes of the chat service.
pub fn chat_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent/message/stream", post(agent::message_stream))
        .route("/agent/generate-title", post(agent::generate_title))
        .route("/admin/config", get(admin::get_config).post(admin::set_config))
        .route("/admin/providers", get(admin::list_providers))
        .route("/admin/models", get(admin::list_models))
        .route(
            "/admin/function-calls",
            get(admin::list_functions).post(admin::update_function),
        )
        .route(
            "/admin/system-prompt",
            get(admin::get_system_prompt).put(admin::set_system_prompt),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
