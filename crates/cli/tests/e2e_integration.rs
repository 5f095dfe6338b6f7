//! End-to-end integration tests for the FocusLens context engine.
//!
//! These tests drive the full pipeline through the orchestrator: activity
//! tracking, retrieval, gated search, detached summary and vision work,
//! autonomous acquisition, decay and budgeted context assembly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use focuslens_agent::Orchestrator;
use focuslens_config::{AppConfig, SearchConfig};
use focuslens_core::error::{ProviderError, SearchError};
use focuslens_core::layer::{
    AcquiredLayer, AcquisitionTask, KnowledgeLayer, Layer, LayerKind, MemoryLayer, QueryOptions,
    TermsLayer, VlmLayer,
};
use focuslens_core::message::{ImageRef, Message};
use focuslens_core::provider::{Provider, ProviderRequest, ProviderResponse};
use focuslens_core::search::{SearchBackend, SearchHit, SearchOptions};
use focuslens_core::session_keys::MEMORY_TODAY;
use focuslens_memory::activity::day_key;
use focuslens_memory::{FileBackend, InMemoryBackend, PersistentStore};

// ── Mock capabilities ────────────────────────────────────────────────────

type Respond = Box<dyn Fn(&ProviderRequest) -> Result<String, String> + Send + Sync>;

/// A provider answering from a closure; optionally slow.
struct ScriptedProvider {
    respond: Respond,
    delay: StdDuration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(respond: impl Fn(&ProviderRequest) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: StdDuration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: StdDuration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match (self.respond)(&request) {
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

fn has_image(request: &ProviderRequest) -> bool {
    request.messages.iter().any(|m| !m.images.is_empty())
}

/// A search backend answering from a closure of the query.
struct ScriptedSearch {
    respond: Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    fn new(respond: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SearchBackend for ScriptedSearch {
    fn name(&self) -> &str {
        "e2e_search"
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

// ── Helpers ──────────────────────────────────────────────────────────────

fn config_with_search() -> AppConfig {
    AppConfig {
        search: SearchConfig {
            enabled: true,
            ..SearchConfig::default()
        },
        ..AppConfig::default()
    }
}

fn memory_store() -> Arc<PersistentStore> {
    Arc::new(PersistentStore::new(Arc::new(InMemoryBackend::new()), 500))
}

async fn engine(
    config: AppConfig,
    provider: Option<Arc<ScriptedProvider>>,
    search: Option<Arc<ScriptedSearch>>,
) -> Orchestrator {
    let provider: Option<Arc<dyn Provider>> = provider.map(|p| p as Arc<dyn Provider>);
    let search: Option<Arc<dyn SearchBackend>> = search.map(|s| s as Arc<dyn SearchBackend>);
    Orchestrator::new(config, memory_store(), provider, search).await
}

fn screenshot() -> ImageRef {
    ImageRef::new("image/png", "iVBORw0KGgo=")
}

fn long_text() -> String {
    "detailed background material ".repeat(10)
}

// ── Activity and retrieval ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_notepad_ticks_reach_session_and_store() {
    let engine = engine(AppConfig::default(), None, None).await;
    for _ in 0..12 {
        engine.tracker().tick("Notepad");
    }

    engine.before_request("Notepad", None).await;
    let today: BTreeMap<String, u64> =
        serde_json::from_value(engine.session().get(MEMORY_TODAY).await.unwrap()).unwrap();
    assert_eq!(today["Notepad"], 12);

    let now = Utc::now();
    engine.tracker().flush_at(now).await;
    match engine.store().get("Notepad", LayerKind::Memory).await {
        Some(Layer::Memory(m)) => {
            assert!(m.total_sec >= 12);
            assert_eq!(m.recent_days.get(&day_key(now)), Some(&12));
            assert_eq!(m.day_count, 1);
        }
        other => panic!("expected memory layer, got {other:?}"),
    }
}

#[tokio::test]
async fn e2e_fuzzy_query_matches_stored_subject() {
    let store = memory_store();
    store
        .set(
            "notepad untitled",
            Layer::Memory(MemoryLayer {
                total_sec: 40,
                last_seen: Utc::now(),
                day_count: 1,
                recent_days: BTreeMap::new(),
            }),
        )
        .await;

    let hits = store
        .query(
            "Notepad - file.txt",
            &QueryOptions::layer(LayerKind::Memory).min_confidence(0.3),
        )
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].subject, "notepad untitled");
    assert!((hits[0].confidence - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn e2e_record_cleanup_on_last_layer_removal() {
    let store = memory_store();
    store
        .set(
            "Spreadsheet",
            Layer::Knowledge(KnowledgeLayer {
                summary: "Budget sheet".into(),
                last_updated: Utc::now(),
                update_count: 1,
                current_interval: 300,
            }),
        )
        .await;
    assert!(store.record("Spreadsheet").await.is_some());

    store
        .update("Spreadsheet", LayerKind::Knowledge, |_| {
            Some(Layer::Knowledge(KnowledgeLayer {
                summary: String::new(),
                last_updated: Utc::now(),
                update_count: 2,
                current_interval: 600,
            }))
        })
        .await;
    assert!(store.record("Spreadsheet").await.is_none());
    assert!(store.is_dirty());
}

// ── Search, summaries and vision ─────────────────────────────────────────

#[tokio::test]
async fn e2e_search_feeds_summary_and_context() {
    let provider = Arc::new(ScriptedProvider::new(|_| Ok("Rust ownership guide".into())));
    let search = Arc::new(ScriptedSearch::new(|_| Ok("Ownership rules explained".into())));
    let engine = engine(config_with_search(), Some(provider.clone()), Some(search.clone())).await;

    let subject = "Rust book - chapter 4";
    engine.tracker().tick_secs(subject, 30);
    let first = engine.before_request(subject, None).await;
    assert!(first.contains("Search results:\nRust book - chapter 4: Ownership rules explained"));
    engine.settle().await;

    match engine.store().get(subject, LayerKind::Knowledge).await {
        Some(Layer::Knowledge(k)) => {
            assert_eq!(k.summary, "Rust ownership guide");
            assert_eq!(k.update_count, 1);
        }
        other => panic!("expected knowledge layer, got {other:?}"),
    }

    let second = engine.context(subject).await;
    assert!(second.contains("- Rust book - chapter 4: Rust ownership guide"));
    assert_eq!(search.queries().len(), 1);
}

#[tokio::test]
async fn e2e_summary_dropped_when_focus_moves_on() {
    let provider = Arc::new(
        ScriptedProvider::new(|_| Ok("Rust ownership guide".into()))
            .slow(StdDuration::from_millis(200)),
    );
    let search = Arc::new(ScriptedSearch::new(|_| Ok("Ownership rules explained".into())));
    let engine = engine(config_with_search(), Some(provider.clone()), Some(search)).await;

    let subject = "Rust book - chapter 4";
    engine.tracker().tick_secs(subject, 30);
    engine.before_request(subject, None).await;
    engine.before_request("Spreadsheet", None).await;
    engine.settle().await;

    assert!(provider.calls() >= 1);
    assert!(!engine.store().has(subject, LayerKind::Knowledge).await);
}

#[tokio::test]
async fn e2e_vision_enriches_focus_line() {
    let provider = Arc::new(ScriptedProvider::new(|req| {
        if has_image(req) {
            Ok("rust, tokio, async | Writing an async Rust service".into())
        } else {
            Ok("unused".into())
        }
    }));
    let engine = engine(AppConfig::default(), Some(provider), None).await;
    engine.tracker().tick_secs("Code - main.rs", 45);

    engine.before_request("Code - main.rs", Some(screenshot())).await;
    engine.settle().await;

    match engine.store().get("Code - main.rs", LayerKind::Vlm).await {
        Some(Layer::Vlm(v)) => {
            assert_eq!(v.summary, "rust, tokio, async");
            assert_eq!(v.enriched_title, "Writing an async Rust service");
        }
        other => panic!("expected vlm layer, got {other:?}"),
    }
    let context = engine.context("Code - main.rs").await;
    assert!(context.starts_with("Current focus: Code - main.rs (Writing an async Rust service)"));
}

#[tokio::test]
async fn e2e_superseded_vision_result_is_discarded() {
    let provider = Arc::new(
        ScriptedProvider::new(|_| Ok("spreadsheets | Quarterly budget".into()))
            .slow(StdDuration::from_millis(100)),
    );
    let engine = engine(AppConfig::default(), Some(provider.clone()), None).await;
    engine.tracker().tick_secs("Budget - Excel", 45);

    engine.before_request("Budget - Excel", Some(screenshot())).await;
    // A new cycle starts while the extraction is still in flight.
    engine.before_request("Terminal", None).await;
    engine.settle().await;

    assert_eq!(provider.calls(), 1);
    assert!(engine.store().get("Budget - Excel", LayerKind::Vlm).await.is_none());
    let context = engine.context("Terminal").await;
    assert!(context.starts_with("Current focus: Terminal"));
    assert!(!context.contains("Quarterly budget"));
}

// ── Autonomous acquisition ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_three_strong_results_verify_topic() {
    let search = Arc::new(ScriptedSearch::new(|_| Ok(long_text())));
    let engine = engine(config_with_search(), None, Some(search)).await;
    let store = engine.store().clone();
    let now = Utc::now();

    store
        .set(
            "X",
            Layer::Terms(TermsLayer {
                terms: vec!["x one".into(), "x two".into(), "x three".into()],
                generated_at: now,
                lang: "en".into(),
                verified: false,
                sources: Vec::new(),
            }),
        )
        .await;
    let acquisition = engine.acquisition();
    acquisition.rebuild_index().await;
    acquisition
        .enqueue(
            ["x one", "x two", "x three"]
                .iter()
                .map(|t| AcquisitionTask::pending("X", *t, now))
                .collect(),
        )
        .await;

    let report = acquisition.process_queue_at(3, now).await;
    assert_eq!(report.succeeded, 3);
    match store.get("X", LayerKind::Terms).await {
        Some(Layer::Terms(t)) => assert!(t.verified),
        other => panic!("expected terms layer, got {other:?}"),
    }
    assert!(acquisition.known_topic("X").is_some_and(|t| t.verified));
}

#[tokio::test]
async fn e2e_failing_task_exhausts_retries() {
    let search = Arc::new(ScriptedSearch::new(|_| Err("upstream down".into())));
    let engine = engine(config_with_search(), None, Some(search.clone())).await;
    let acquisition = engine.acquisition();
    let t0 = Utc::now();
    acquisition
        .enqueue(vec![AcquisitionTask::pending("Y", "y term", t0)])
        .await;

    for i in 0..3 {
        acquisition
            .process_queue_at(1, t0 + Duration::seconds(60 * i))
            .await;
    }
    assert_eq!(search.queries().len(), 3);
    assert!(acquisition.queue().await.is_empty());
    assert!(engine.store().record("y term").await.is_none());
}

#[tokio::test]
async fn e2e_discovery_from_vision_keywords() {
    let provider = Arc::new(ScriptedProvider::new(|req| {
        let system = &req.messages[0].content;
        if has_image(req) {
            Ok("postgres, query planner | Tuning a SQL query".into())
        } else if system.contains("topics") {
            Ok("Query planning".into())
        } else {
            Ok("postgres explain analyze\npostgres index types".into())
        }
    }));
    let search = Arc::new(ScriptedSearch::new(|_| Ok(long_text())));
    let engine = engine(config_with_search(), Some(provider), Some(search)).await;
    engine.tracker().tick_secs("psql - orders", 90);

    engine.before_request("psql - orders", Some(screenshot())).await;
    engine.settle().await;

    let queue = engine.acquisition().queue().await;
    let terms: Vec<&str> = queue.iter().map(|t| t.term.as_str()).collect();
    assert!(terms.contains(&"postgres explain analyze"));
    assert!(terms.contains(&"postgres index types"));
    assert!(queue.iter().all(|t| t.topic == "Query planning"));
    assert!(engine.store().has("Query planning", LayerKind::Terms).await);
}

#[tokio::test]
async fn e2e_acquired_knowledge_returns_to_the_window_that_led_to_it() {
    let provider = Arc::new(ScriptedProvider::new(|req| {
        let system = &req.messages[0].content;
        if has_image(req) {
            Ok("postgres, query planner | Tuning a SQL query".into())
        } else if system.contains("topics") {
            Ok("Query planning".into())
        } else {
            Ok("postgres explain analyze\npostgres index types".into())
        }
    }));
    let search = Arc::new(ScriptedSearch::new(|_| Ok(long_text())));
    let engine = engine(config_with_search(), Some(provider), Some(search)).await;
    engine.tracker().tick_secs("psql - orders", 90);

    engine.before_request("psql - orders", Some(screenshot())).await;
    engine.settle().await;

    match engine.store().get("Query planning", LayerKind::Terms).await {
        Some(Layer::Terms(t)) => assert_eq!(t.sources, vec!["psql - orders"]),
        other => panic!("expected terms layer, got {other:?}"),
    }

    engine
        .acquisition()
        .process_queue_at(2, Utc::now() + Duration::minutes(2))
        .await;
    assert!(
        engine
            .store()
            .has("postgres explain analyze", LayerKind::Acquired)
            .await
    );

    let context = engine.context("psql - orders").await;
    assert!(context.contains("postgres explain analyze (Query planning): "));
    assert!(context.contains("detailed background material"));

    // Acquired text stays with the windows that produced its topic.
    let elsewhere = engine.context("Spreadsheet - budget").await;
    assert!(!elsewhere.contains("(Query planning)"));
}

#[tokio::test]
async fn e2e_decay_on_first_cycle() {
    let engine = engine(AppConfig::default(), None, None).await;
    let now = Utc::now();
    engine
        .store()
        .set(
            "old term",
            Layer::Acquired(AcquiredLayer {
                summary: "old background".into(),
                topic: "T".into(),
                term: "old term".into(),
                confidence: 0.8,
                original_confidence: 0.8,
                searched_at: now - Duration::days(22),
            }),
        )
        .await;

    engine.before_request_at("Terminal", None, now).await;
    match engine.store().get("old term", LayerKind::Acquired).await {
        Some(Layer::Acquired(a)) => {
            assert!((a.confidence - 0.5).abs() < 1e-9);
            assert!((a.original_confidence - 0.8).abs() < 1e-9);
        }
        other => panic!("expected acquired layer, got {other:?}"),
    }
}

// ── Context assembly ─────────────────────────────────────────────────────

async fn crowded_engine() -> Orchestrator {
    let engine = engine(AppConfig::default(), None, None).await;
    let store = engine.store().clone();
    let now = Utc::now();
    for i in 0..40 {
        let subject = format!("Project {i} notes");
        store
            .set(
                &subject,
                Layer::Memory(MemoryLayer {
                    total_sec: 600 + i,
                    last_seen: now,
                    day_count: 3,
                    recent_days: BTreeMap::new(),
                }),
            )
            .await;
        store
            .set(
                &subject,
                Layer::Knowledge(KnowledgeLayer {
                    summary: format!("Long running notes {}", "about plans ".repeat(15)),
                    last_updated: now,
                    update_count: 1,
                    current_interval: 300,
                }),
            )
            .await;
        store
            .set(
                &subject,
                Layer::Vlm(VlmLayer {
                    summary: "planning, notes, roadmap".into(),
                    enriched_title: "Planning the roadmap".into(),
                    last_updated: now,
                    update_count: 1,
                }),
            )
            .await;
        engine.tracker().tick_secs(&subject, 100 + i);
    }
    engine
}

#[tokio::test]
async fn e2e_context_never_exceeds_budget() {
    let engine = crowded_engine().await;
    let context = engine.before_request("Project 7 notes", None).await;
    assert!(context.chars().count() <= 2500);
    assert!(context.starts_with("Current focus: Project 7 notes (Planning the roadmap)"));

    let assembled = engine.assemble("Project 7 notes").await;
    assert_eq!(assembled.metadata.budget, 2500);
    assert!(assembled.metadata.total_chars <= 2500);
}

#[tokio::test]
async fn e2e_assembly_is_idempotent() {
    let engine = crowded_engine().await;
    engine.before_request("Project 3 notes", None).await;
    let first = engine.context("Project 3 notes").await;
    let second = engine.context("Project 3 notes").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn e2e_credential_like_titles_are_masked() {
    let engine = engine(AppConfig::default(), None, None).await;
    let context = engine
        .before_request("curl -H token sk4f9a8b7c6d5e4f3a2b1c0d9e8f", None)
        .await;
    assert!(context.contains("sk4f****"));
    assert!(!context.contains("sk4f9a8b7c6d5e4f3a2b1c0d9e8f"));
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_knowledge_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("knowledge.json");

    {
        let store = Arc::new(PersistentStore::load(Arc::new(FileBackend::new(path.clone())), 500).await);
        let engine = Orchestrator::new(AppConfig::default(), store, None, None).await;
        engine.tracker().tick_secs("Notepad", 25);
        engine.before_request("Notepad", None).await;
        engine.shutdown().await.unwrap();
    }

    let store = PersistentStore::load(Arc::new(FileBackend::new(path.clone())), 500).await;
    match store.get("Notepad", LayerKind::Memory).await {
        Some(Layer::Memory(m)) => assert_eq!(m.total_sec, 25),
        other => panic!("expected memory layer, got {other:?}"),
    }
}
