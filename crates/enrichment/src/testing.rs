//! Scripted capabilities for unit tests.

use async_trait::async_trait;
use focuslens_core::error::{ProviderError, SearchError};
use focuslens_core::message::Message;
use focuslens_core::provider::{Provider, ProviderRequest, ProviderResponse};
use focuslens_core::search::{SearchBackend, SearchHit, SearchOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Respond = Box<dyn Fn(&ProviderRequest, usize) -> Result<String, String> + Send + Sync>;

/// A provider answering from a closure of (request, call index).
pub struct ScriptedProvider {
    respond: Respond,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn with(
        respond: impl Fn(&ProviderRequest, usize) -> Result<String, String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::with(move |_, _| Ok(text.clone()))
    }

    /// Answer in order; the last entry repeats.
    pub fn sequence(script: &[Result<&str, &str>]) -> Arc<Self> {
        let script: Vec<Result<String, String>> = script
            .iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Self::with(move |_, i| script[i.min(script.len() - 1)].clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = (self.respond)(&request, index);
        self.requests.lock().unwrap().push(request.clone());
        match answer {
            Ok(text) => Ok(ProviderResponse {
                message: Message::assistant(text),
                model: request.model,
            }),
            Err(message) => Err(ProviderError::ApiError {
                status_code: 500,
                message,
            }),
        }
    }
}

/// A search backend answering from a closure of the query.
pub struct ScriptedSearch {
    respond: Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn with(respond: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, _options: &SearchOptions) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        match (self.respond)(query) {
            Ok(snippet) => Ok(vec![SearchHit {
                title: query.to_string(),
                url: "https://example.com".into(),
                snippet,
            }]),
            Err(e) => Err(SearchError::Failed(e)),
        }
    }
}
