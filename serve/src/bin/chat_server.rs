//! Chat service binary.
//!
//! Env: `ATLAS_MODEL`, `OPENAI_API_KEY` (and friends), `CHAT_ADDR`,
//! `FUNCTIONS_CONFIG_PATH`, `RETRIEVAL_SERVICE_URL`. `.env` and
//! `~/.config/atlas/config.toml` are layered under existing env.

use std::sync::Arc;

use atlas::{Container, ContainerConfig};
use serve::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = config::load_and_apply("atlas", None);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut container_config = ContainerConfig::default();
    if let Ok(path) = std::env::var("FUNCTIONS_CONFIG_PATH") {
        container_config.functions_config_path = Some(path.into());
    }
    let container = Arc::new(Container::build(container_config).await?);
    let state = Arc::new(AppState::new(Arc::clone(&container)));

    let addr = std::env::var("CHAT_ADDR").ok();
    let result = serve::run_chat_serve(addr.as_deref(), state).await;
    container.shutdown().await;
    result
}
