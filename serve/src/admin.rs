//! Admin endpoints: provider/model selection, function toggles, prompt
//! template.

use std::sync::Arc;

use atlas::{ChatOpenAI, ChatService};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::{AppState, LlmSettings};
use crate::response::error_response;

/// Known providers and their models. The provider id selects the API key
/// env var family; every provider speaks the OpenAI-compatible wire.
const PROVIDERS: &[(&str, &[&str])] = &[
    ("openai", &["gpt-4o", "gpt-4o-mini", "gpt-4.1-mini"]),
    ("qwen", &["qwen-plus", "qwen-turbo", "qwen-max"]),
    ("deepseek", &["deepseek-chat"]),
];

/// GET /admin/config — active provider and model.
pub(crate) async fn get_config(State(state): State<Arc<AppState>>) -> Json<LlmSettings> {
    Json(state.settings.read().await.clone())
}

/// POST /admin/config — switch provider/model; the chat service is rebuilt
/// so the next turn uses the new model.
pub(crate) async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<LlmSettings>,
) -> Result<Json<LlmSettings>, Response> {
    let known = PROVIDERS
        .iter()
        .find(|(id, _)| *id == settings.provider)
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown provider: {}", settings.provider),
            )
        })?;
    if !known.1.contains(&settings.model.as_str()) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "unknown model '{}' for provider '{}'",
                settings.model, settings.provider
            ),
        ));
    }

    let llm = Arc::new(ChatOpenAI::new(settings.model.clone()));
    let chat = Arc::new(ChatService::new(
        llm,
        Arc::clone(&state.container.registry),
        Arc::clone(&state.container.prompt_template),
    ));
    *state.chat.write().await = chat;
    *state.settings.write().await = settings.clone();
    info!(provider = %settings.provider, model = %settings.model, "llm settings updated");
    Ok(Json(settings))
}

/// GET /admin/providers — the provider catalogue.
pub(crate) async fn list_providers() -> Json<Value> {
    let providers: Vec<Value> = PROVIDERS
        .iter()
        .map(|(id, models)| json!({ "id": id, "models": models }))
        .collect();
    Json(json!({ "providers": providers }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelsQuery {
    provider: String,
}

/// GET /admin/models?provider=x — models for one provider.
pub(crate) async fn list_models(
    Query(query): Query<ModelsQuery>,
) -> Result<Json<Value>, Response> {
    let (_, models) = PROVIDERS
        .iter()
        .find(|(id, _)| *id == query.provider)
        .ok_or_else(|| {
            error_response(
                StatusCode::NOT_FOUND,
                format!("unknown provider: {}", query.provider),
            )
        })?;
    Ok(Json(json!({ "provider": query.provider, "models": models })))
}

/// GET /admin/function-calls — every registered function with state.
pub(crate) async fn list_functions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let functions = state.container.registry.list().await;
    Json(json!({ "functions": functions }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateFunctionRequest {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

/// POST /admin/function-calls — toggle one function and persist.
pub(crate) async fn update_function(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateFunctionRequest>,
) -> Result<Json<Value>, Response> {
    let registry = &state.container.registry;
    let result = if request.enabled {
        registry.enable(&request.name).await
    } else {
        registry.disable(&request.name).await
    };
    result.map_err(|e| error_response(StatusCode::NOT_FOUND, e.to_string()))?;

    if let Some(config) = request.config {
        registry
            .set_config(&request.name, config)
            .await
            .map_err(|e| error_response(StatusCode::NOT_FOUND, e.to_string()))?;
    }
    registry
        .save_to_yaml()
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "name": request.name,
        "enabled": request.enabled,
    })))
}

/// GET /admin/system-prompt — current template.
pub(crate) async fn get_system_prompt(State(state): State<Arc<AppState>>) -> Json<Value> {
    let template = state.container.get_prompt_template().await;
    Json(json!({ "system_prompt_template": template }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetPromptRequest {
    pub system_prompt_template: String,
}

/// PUT /admin/system-prompt — replace the template (hot-reloaded).
pub(crate) async fn set_system_prompt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetPromptRequest>,
) -> Result<Json<Value>, Response> {
    if request.system_prompt_template.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "system prompt template must not be empty",
        ));
    }
    state
        .container
        .set_prompt_template(request.system_prompt_template)
        .await;
    Ok(Json(json!({ "status": "ok" })))
}
