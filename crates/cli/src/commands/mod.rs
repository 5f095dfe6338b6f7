//! Subcommand implementations and the wiring they share.

pub mod config_cmd;
pub mod context;
pub mod decay;
pub mod onboard;
pub mod run;
pub mod status;

use base64::Engine as _;
use focuslens_agent::Orchestrator;
use focuslens_config::AppConfig;
use focuslens_core::message::ImageRef;
use focuslens_memory::{FileBackend, PersistentStore};
use std::path::Path;
use std::sync::Arc;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the knowledge store at the configured path. A missing file starts
/// empty; an unreadable one is logged and also starts empty.
pub async fn open_store(config: &AppConfig) -> Arc<PersistentStore> {
    let backend = Arc::new(FileBackend::new(config.memory.store_path()));
    Arc::new(PersistentStore::load(backend, config.memory.max_subjects).await)
}

/// Build the orchestrator with capabilities taken from the config.
pub async fn build_engine(config: AppConfig) -> Orchestrator {
    let store = open_store(&config).await;
    let provider = focuslens_providers::provider_from_config(&config);
    let search = focuslens_providers::search_from_config(&config);
    if provider.is_none() {
        tracing::warn!("No provider API key, summaries and vision disabled");
    }
    Orchestrator::new(config, store, provider, search).await
}

fn media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Read a screenshot into an inline image reference.
pub async fn load_image(path: &Path) -> CliResult<ImageRef> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Failed to read image {}: {e}", path.display()))?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ImageRef::new(media_type(path), data))
}
