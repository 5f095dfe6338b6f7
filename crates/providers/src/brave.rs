//! Brave Search backend.
//!
//! Calls the Brave web search API and maps its `web.results` array onto
//! [`SearchHit`]s. Any non-success status becomes a typed [`SearchError`].

use async_trait::async_trait;
use focuslens_core::error::SearchError;
use focuslens_core::search::{SearchBackend, SearchHit, SearchOptions};
use serde::Deserialize;
use tracing::{debug, warn};

const BRAVE_URL: &str = "https://api.search.brave.com/res/v1/web/search";

pub struct BraveSearch {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, BRAVE_URL)
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            client,
        }
    }

    fn hits(response: BraveResponse, max: usize) -> Vec<SearchHit> {
        response
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(max)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: strip_tags(&r.description),
            })
            .collect()
    }
}

/// Brave wraps matched terms in `<strong>`; snippets are plain text here.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[async_trait]
impl SearchBackend for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::NotConfigured("no Brave API key".into()));
        }

        let count = options.max_results.clamp(1, 20).to_string();
        let mut params = vec![("q", query.to_string()), ("count", count)];
        if let Some(lang) = &options.lang {
            params.push(("search_lang", lang.clone()));
        }

        debug!(query, "Brave search request");

        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Brave search returned error");
            return Err(SearchError::Failed(format!("HTTP {}", status.as_u16())));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Failed(format!("Failed to parse response: {e}")))?;

        Ok(Self::hits(parsed, options.max_results))
    }
}

// --- Brave API types (internal) ---

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}
