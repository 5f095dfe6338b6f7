//! Enrichment service: a stateless wrapper around the lookup capability.
//!
//! Disabled unless search is enabled and a backend is configured. Every
//! failure, including an elapsed deadline, comes back as a `SearchError`;
//! nothing here panics or hangs.

use focuslens_config::SearchConfig;
use focuslens_core::error::SearchError;
use focuslens_core::search::{SearchBackend, SearchHit, SearchOptions, render_hits};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Hits plus their rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub text: String,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub struct EnrichmentService {
    backend: RwLock<Option<Arc<dyn SearchBackend>>>,
    config: RwLock<SearchConfig>,
}

impl EnrichmentService {
    pub fn new(backend: Option<Arc<dyn SearchBackend>>, config: SearchConfig) -> Self {
        Self {
            backend: RwLock::new(backend),
            config: RwLock::new(config),
        }
    }

    /// Replace backend and settings together.
    pub fn configure(&self, backend: Option<Arc<dyn SearchBackend>>, config: SearchConfig) {
        *self.backend.write().unwrap_or_else(|e| e.into_inner()) = backend;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> SearchConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn backend(&self) -> Option<Arc<dyn SearchBackend>> {
        self.backend.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.config().enabled && self.backend().is_some()
    }

    pub async fn search(&self, query: &str) -> Result<SearchResults, SearchError> {
        self.search_with_lang(query, None).await
    }

    /// Run one bounded lookup.
    pub async fn search_with_lang(
        &self,
        query: &str,
        lang: Option<&str>,
    ) -> Result<SearchResults, SearchError> {
        let config = self.config();
        let backend = match self.backend() {
            Some(b) if config.enabled => b,
            _ => return Err(SearchError::NotConfigured("search is disabled".into())),
        };
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Failed("empty query".into()));
        }

        let options = SearchOptions {
            max_results: config.max_results,
            lang: lang.map(str::to_string),
        };
        let deadline = Duration::from_secs(config.timeout_secs);

        let hits = match tokio::time::timeout(deadline, backend.search(query, &options)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(backend = backend.name(), query, error = %e, "Search failed");
                return Err(e);
            }
            Err(_) => {
                warn!(backend = backend.name(), query, "Search timed out");
                return Err(SearchError::Timeout {
                    timeout_secs: config.timeout_secs,
                });
            }
        };

        debug!(backend = backend.name(), query, hits = hits.len(), "Search complete");
        let text = render_hits(&hits);
        Ok(SearchResults {
            query: query.to_string(),
            hits,
            text,
        })
    }
}
