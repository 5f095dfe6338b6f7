//! Capability implementations for FocusLens.
//!
//! Generative providers implement `focuslens_core::Provider`; search
//! backends implement `focuslens_core::SearchBackend`. Both are built from
//! configuration here so the engine only ever sees the traits.

pub mod brave;
pub mod openai_compat;

pub use brave::BraveSearch;
pub use openai_compat::OpenAiCompatProvider;

use focuslens_config::AppConfig;
use focuslens_core::{Provider, SearchBackend};
use std::sync::Arc;
use tracing::warn;

/// Build the generative provider.
///
/// A local Ollama needs no API key; when its URL is left at the hosted
/// default it points at the local daemon instead. Every other provider is
/// `None` until a key is configured.
pub fn provider_from_config(config: &AppConfig) -> Option<Arc<dyn Provider>> {
    let provider = &config.provider;
    match provider.name.as_str() {
        "ollama" => Some(Arc::new(OpenAiCompatProvider::ollama(ollama_url(&provider.api_url)))),
        name => {
            let key = provider.api_key.clone().filter(|k| !k.is_empty())?;
            Some(Arc::new(OpenAiCompatProvider::new(
                name,
                provider.api_url.clone(),
                key,
            )))
        }
    }
}

/// A configured Ollama URL, unless it is empty or still the hosted default.
fn ollama_url(api_url: &str) -> Option<&str> {
    let url = api_url.trim();
    let hosted = url.trim_end_matches('/') == openai_compat::OPENROUTER_URL;
    (!url.is_empty() && !hosted).then_some(url)
}

/// Build the search backend, or `None` when search is disabled or unkeyed.
pub fn search_from_config(config: &AppConfig) -> Option<Arc<dyn SearchBackend>> {
    if !config.search.enabled {
        return None;
    }
    match config.search.provider.as_str() {
        "brave" => {
            let key = config.search.api_key.clone().filter(|k| !k.is_empty())?;
            Some(Arc::new(BraveSearch::new(key)))
        }
        other => {
            warn!(provider = other, "Unknown search provider, search disabled");
            None
        }
    }
}
