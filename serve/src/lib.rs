//! HTTP surface for Atlas (axum).
//!
//! Two routers: the chat service (`/agent/*` streaming SSE plus `/admin/*`
//! configuration) and the retrieval service (`/api/search`). Each has a
//! `run_*` entry point binding a listener and an `*_on_listener` variant
//! used by tests (bind to `127.0.0.1:0`, pass the listener in).

mod admin;
mod agent;
mod app;
mod response;
mod retrieval;

pub use app::{chat_router, AppState};
pub use retrieval::{retrieval_router, RetrievalState};

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_CHAT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_RETRIEVAL_ADDR: &str = "127.0.0.1:8001";

/// Runs the chat service on an existing listener.
pub async fn run_chat_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("chat service listening on http://{}", addr);
    axum::serve(listener, chat_router(state)).await?;
    Ok(())
}

/// Runs the chat service. Listens on `addr` (default 127.0.0.1:8000).
pub async fn run_chat_serve(
    addr: Option<&str>,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_CHAT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_chat_serve_on_listener(listener, state).await
}

/// Runs the retrieval service on an existing listener.
pub async fn run_retrieval_serve_on_listener(
    listener: TcpListener,
    state: Arc<RetrievalState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("retrieval service listening on http://{}", addr);
    axum::serve(listener, retrieval_router(state)).await?;
    Ok(())
}

/// Runs the retrieval service. Listens on `addr` (default 127.0.0.1:8001).
pub async fn run_retrieval_serve(
    addr: Option<&str>,
    state: Arc<RetrievalState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_RETRIEVAL_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_retrieval_serve_on_listener(listener, state).await
}
