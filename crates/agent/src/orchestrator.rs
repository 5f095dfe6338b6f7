//! The orchestrator: one focus-evaluation cycle per call.
//!
//! `before_request` runs, in order:
//!
//! 1. **Invalidate**: on a subject change, drop the session's vision title and
//!    any cached search results unrelated to the new subject
//! 2. **Publish** the tracker's live view of today's activity
//! 3. **Search** when every gate passes (awaited, bounded by the search
//!    timeout), caching the results in both stores and scheduling a summary
//!    update; otherwise reuse related cached results for the summary
//! 4. **Detach** vision extraction (chained into topic discovery) and
//!    acquisition queue processing
//! 5. **Flush** the persistent store if dirty
//! 6. **Assemble** the budgeted, masked context block
//!
//! Nothing in a cycle can fail the caller: enrichment errors are logged and
//! the worst case is a thinner context block.

use chrono::{DateTime, Duration, Utc};
use focuslens_config::AppConfig;
use focuslens_core::cycle::{CycleGuard, CycleToken};
use focuslens_core::error::{SearchError, StoreError};
use focuslens_core::layer::{Layer, LayerKind, QueryOptions, SearchLayer};
use focuslens_core::message::ImageRef;
use focuslens_core::provider::Provider;
use focuslens_core::search::SearchBackend;
use focuslens_core::session_keys::{
    SEARCH_RESULTS, SEARCH_SUBJECT, VLM_ENRICHED_TITLE, VLM_KEYWORDS,
};
use focuslens_core::subject::{is_noise_subject, normalize_subject, related, truncate_chars};
use focuslens_enrichment::{
    AutonomousAcquisition, EnrichmentService, SummaryStore, VisionExtractor, VisionOutcome,
};
use focuslens_memory::{ActivityTracker, PersistentStore, SessionStore};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::{AssembledContext, ContextAssembler, sections};

#[derive(Debug, Default)]
struct CycleState {
    subject: Option<String>,
    searched_subject: Option<String>,
    searched_at: Option<DateTime<Utc>>,
}

pub struct Orchestrator {
    config: RwLock<AppConfig>,
    provider: RwLock<Option<Arc<dyn Provider>>>,
    search_backend: RwLock<Option<Arc<dyn SearchBackend>>>,
    session: Arc<SessionStore>,
    store: Arc<PersistentStore>,
    tracker: Arc<ActivityTracker>,
    search: Arc<EnrichmentService>,
    summaries: Arc<SummaryStore>,
    vision: Arc<VisionExtractor>,
    acquisition: Arc<AutonomousAcquisition>,
    cycles: Arc<CycleGuard>,
    assembler: RwLock<ContextAssembler>,
    state: Mutex<CycleState>,
    tasks: Mutex<JoinSet<()>>,
    decayed: AtomicBool,
}

impl Orchestrator {
    /// Wire every component around `store` and recover their persisted
    /// schedules (summary and vision backoff, the known-topic index).
    pub async fn new(
        config: AppConfig,
        store: Arc<PersistentStore>,
        provider: Option<Arc<dyn Provider>>,
        search_backend: Option<Arc<dyn SearchBackend>>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(config.memory.session_max_entries));
        let cycles = Arc::new(CycleGuard::new());
        let tracker = Arc::new(ActivityTracker::new(
            store.clone(),
            session.clone(),
            config.memory.clone(),
        ));
        let search = Arc::new(EnrichmentService::new(
            search_backend.clone(),
            config.search.clone(),
        ));
        let summaries = Arc::new(SummaryStore::new(
            store.clone(),
            cycles.clone(),
            provider.clone(),
            &config.provider,
            config.knowledge.clone(),
        ));
        let vision = Arc::new(VisionExtractor::new(
            store.clone(),
            session.clone(),
            cycles.clone(),
            provider.clone(),
            &config.provider,
            config.vlm.clone(),
        ));
        vision.configure(
            provider.clone(),
            &config.provider,
            config.vlm.clone(),
            config.noise_subjects.clone(),
        );
        let acquisition = Arc::new(AutonomousAcquisition::new(
            store.clone(),
            search.clone(),
            provider.clone(),
            &config.provider,
            config.knowledge_acq.clone(),
        ));

        let knowledge = summaries.recover().await;
        let vlm = vision.recover().await;
        let topics = acquisition.rebuild_index().await;
        info!(
            knowledge,
            vlm,
            topics,
            provider = provider.as_ref().map_or("none", |p| p.name()),
            search = search.is_enabled(),
            "Orchestrator ready"
        );

        Self {
            assembler: RwLock::new(ContextAssembler::new(&config.context)),
            config: RwLock::new(config),
            provider: RwLock::new(provider),
            search_backend: RwLock::new(search_backend),
            session,
            store,
            tracker,
            search,
            summaries,
            vision,
            acquisition,
            cycles,
            state: Mutex::new(CycleState::default()),
            tasks: Mutex::new(JoinSet::new()),
            decayed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply a new configuration to every component.
    pub fn configure(&self, config: AppConfig) {
        let provider = self.provider.read().unwrap_or_else(|e| e.into_inner()).clone();
        let backend = self
            .search_backend
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        self.search.configure(backend, config.search.clone());
        self.summaries
            .configure(provider.clone(), &config.provider, config.knowledge.clone());
        self.vision.configure(
            provider.clone(),
            &config.provider,
            config.vlm.clone(),
            config.noise_subjects.clone(),
        );
        self.acquisition
            .configure(provider, &config.provider, config.knowledge_acq.clone());
        self.tracker.configure(config.memory.clone());
        *self.assembler.write().unwrap_or_else(|e| e.into_inner()) =
            ContextAssembler::new(&config.context);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        debug!("Configuration applied");
    }

    /// Replace the generative and search capabilities, then re-apply the
    /// current configuration around them.
    pub fn set_capabilities(
        &self,
        provider: Option<Arc<dyn Provider>>,
        search_backend: Option<Arc<dyn SearchBackend>>,
    ) {
        *self.provider.write().unwrap_or_else(|e| e.into_inner()) = provider;
        *self.search_backend.write().unwrap_or_else(|e| e.into_inner()) = search_backend;
        self.configure(self.config());
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    pub fn summaries(&self) -> &Arc<SummaryStore> {
        &self.summaries
    }

    pub fn vision(&self) -> &Arc<VisionExtractor> {
        &self.vision
    }

    pub fn acquisition(&self) -> &Arc<AutonomousAcquisition> {
        &self.acquisition
    }

    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one cycle and return the context block.
    pub async fn before_request(&self, subject: &str, image: Option<ImageRef>) -> String {
        self.before_request_at(subject, image, Utc::now()).await
    }

    pub async fn before_request_at(
        &self,
        subject: &str,
        image: Option<ImageRef>,
        now: DateTime<Utc>,
    ) -> String {
        let subject = normalize_subject(subject);
        let token = self.cycles.begin();
        let config = self.config();
        self.reap();

        if !self.decayed.swap(true, Ordering::SeqCst) {
            self.acquisition.decay_knowledge_at(now).await;
        }

        if subject.is_empty() {
            self.tracker.publish().await;
        } else {
            let changed = self.invalidate_on_change(&subject, &config).await;
            self.tracker.publish().await;
            let focus_secs = self.tracker.focus_secs(&subject).await;
            self.search_step(&subject, changed, focus_secs, token, &config, now)
                .await;
            self.spawn_enrichment(&subject, image, focus_secs, token, &config);
        }

        if self.store.is_dirty() {
            if let Err(e) = self.store.flush().await {
                warn!(error = %e, "Knowledge flush failed, serving from memory");
            }
        }

        self.context(&subject).await
    }

    /// Returns whether the subject changed.
    async fn invalidate_on_change(&self, subject: &str, config: &AppConfig) -> bool {
        let previous = self.state().subject.replace(subject.to_string());
        if previous.as_deref() == Some(subject) {
            return false;
        }

        self.session.delete(VLM_ENRICHED_TITLE).await;
        self.session.delete(VLM_KEYWORDS).await;
        if let Some(searched) = self.session.get_str(SEARCH_SUBJECT).await {
            if !related(&searched, subject, config.search.related_threshold) {
                self.session.delete(SEARCH_RESULTS).await;
                self.session.delete(SEARCH_SUBJECT).await;
                debug!(from = %searched, to = %subject, "Cached search results dropped");
            }
        }
        true
    }

    async fn should_search(
        &self,
        subject: &str,
        focus_secs: u64,
        config: &AppConfig,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.search.is_enabled() {
            return false;
        }
        if is_noise_subject(subject, &config.noise_subjects) {
            debug!(subject, "Noise subject, search skipped");
            return false;
        }
        if focus_secs < config.search.min_focus_secs {
            return false;
        }
        {
            let state = self.state();
            if state.searched_subject.as_deref() == Some(subject) {
                return false;
            }
            let min_gap = Duration::seconds(config.search.min_interval_secs as i64);
            if state.searched_at.is_some_and(|at| now - at < min_gap) {
                debug!(subject, "Search interval not elapsed");
                return false;
            }
        }
        let strong = self
            .store
            .query(subject, &QueryOptions::layer(LayerKind::Knowledge).max_results(1))
            .await
            .first()
            .is_some_and(|hit| hit.confidence > config.knowledge.high_confidence);
        if strong {
            debug!(subject, "Knowledge already strong, search skipped");
        }
        !strong
    }

    async fn search_step(
        &self,
        subject: &str,
        changed: bool,
        focus_secs: u64,
        token: CycleToken,
        config: &AppConfig,
        now: DateTime<Utc>,
    ) {
        if self.should_search(subject, focus_secs, config, now).await {
            {
                let mut state = self.state();
                state.searched_subject = Some(subject.to_string());
                state.searched_at = Some(now);
            }
            match self.search.search(subject).await {
                Ok(results) if !results.is_empty() => {
                    let cached = truncate_chars(&results.text, config.search.max_cached_chars);
                    self.store
                        .set(
                            subject,
                            Layer::Search(SearchLayer {
                                results: cached.clone(),
                                cached_at: now,
                            }),
                        )
                        .await;
                    if self.cycles.is_current(token) {
                        self.session.set(SEARCH_RESULTS, cached).await;
                        self.session.set(SEARCH_SUBJECT, subject).await;
                    }
                    info!(subject, hits = results.hits.len(), "Search results cached");
                    self.spawn_summary(subject, results.text, token);
                }
                Ok(_) => debug!(subject, "Search returned nothing"),
                Err(SearchError::NotConfigured(_)) => {}
                Err(e) => warn!(subject, error = %e, "Search failed"),
            }
            return;
        }

        if !changed {
            return;
        }
        let searched = self.session.get_str(SEARCH_SUBJECT).await;
        let cached = self.session.get_str(SEARCH_RESULTS).await;
        if let (Some(searched), Some(cached)) = (searched, cached) {
            if related(&searched, subject, config.search.related_threshold) {
                debug!(subject, from = %searched, "Reusing related search results");
                self.spawn_summary(subject, cached, token);
            }
        }
    }

    fn spawn_summary(&self, subject: &str, text: String, token: CycleToken) {
        let summaries = self.summaries.clone();
        let subject = subject.to_string();
        self.spawn(async move {
            summaries.maybe_update(&subject, &text, token).await;
        });
    }

    fn spawn_enrichment(
        &self,
        subject: &str,
        image: Option<ImageRef>,
        focus_secs: u64,
        token: CycleToken,
        config: &AppConfig,
    ) {
        if let Some(image) = image {
            let vision = self.vision.clone();
            let acquisition = self.acquisition.clone();
            let subject = subject.to_string();
            self.spawn(async move {
                let outcome = vision.maybe_extract(&subject, image, focus_secs, token).await;
                if let VisionOutcome::Extracted { keywords, .. } = outcome {
                    if !keywords.is_empty() {
                        acquisition.discover(&subject, &keywords, focus_secs).await;
                    }
                }
            });
        }

        let acquisition = self.acquisition.clone();
        let max_tasks = config.knowledge_acq.max_tasks_per_run;
        self.spawn(async move {
            acquisition.process_queue(max_tasks).await;
        });
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks().spawn(task);
    }

    /// Collect finished background tasks without waiting.
    fn reap(&self) {
        let mut tasks = self.tasks();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Background enrichment task failed");
            }
        }
    }

    /// Wait for every outstanding background task.
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.tasks());
            if pending.is_empty() {
                break;
            }
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background enrichment task failed");
                }
            }
        }
    }

    /// Assemble the context block for `subject` from current state only.
    pub async fn context(&self, subject: &str) -> String {
        self.assemble(subject).await.text
    }

    pub async fn assemble(&self, subject: &str) -> AssembledContext {
        let subject = normalize_subject(subject);
        let config = self.config();
        let gathered = sections::gather(&self.session, &self.store, &subject, &config).await;
        let assembled = self
            .assembler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .assemble(&gathered);
        debug!(
            chars = assembled.metadata.total_chars,
            included = ?assembled.metadata.included,
            truncated = ?assembled.metadata.truncated,
            "Context assembled"
        );
        assembled
    }

    /// Settle background work, then persist tracker counts and the store.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.settle().await;
        self.tracker.flush().await;
        self.store.flush().await?;
        info!("Orchestrator shut down");
        Ok(())
    }
}
