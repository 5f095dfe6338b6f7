//! Search trait: the external lookup capability consumed by enrichment.

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single hit from a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Per-request lookup options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum hits to return
    pub max_results: usize,

    /// Preferred result language (ISO 639-1), if the backend supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            lang: None,
        }
    }
}

/// Render hits as the plain-text block stored in the search cache and
/// handed to summarizers.
pub fn render_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| {
            if h.snippet.is_empty() {
                h.title.clone()
            } else {
                format!("{}: {}", h.title, h.snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The lookup capability.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name (e.g. "brave").
    fn name(&self) -> &str;

    /// Run one lookup.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> std::result::Result<Vec<SearchHit>, SearchError>;
}
