//! Autonomous knowledge acquisition.
//!
//! Discovery turns fresh vision keywords into topics, and topics into search
//! terms, enqueuing one pending task per (topic, term). Processing drains the
//! queue at a bounded rate, storing each result as an `acquired` layer with a
//! confidence that reflects how much came back. A topic whose done tasks
//! reach the verification threshold at high confidence is marked verified,
//! which stretches its regeneration cooldown. Decay lowers acquired
//! confidence weekly, always from the original value.
//!
//! The queue lives in the persistent store under a reserved key and is only
//! ever modified through atomic read-modify-write updates, so discovery and
//! processing can interleave without losing tasks.

use chrono::{DateTime, Duration, Utc};
use focuslens_config::{KnowledgeAcqConfig, ProviderConfig};
use focuslens_core::layer::{
    AcquiredLayer, AcquisitionTask, Layer, LayerKind, QUEUE_SUBJECT, QueueLayer, TaskStatus,
    TermsLayer,
};
use focuslens_core::message::Message;
use focuslens_core::provider::Provider;
use focuslens_core::subject::{normalize_subject, truncate_chars};
use focuslens_memory::PersistentStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::backoff::SingleFlight;
use crate::llm::{Generator, parse_list};
use crate::search::EnrichmentService;

/// In-memory view of a topic's terms record.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownTopic {
    pub generated_at: DateTime<Utc>,
    pub lang: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub topics: Vec<String>,
    /// Topics whose terms were (re)generated
    pub generated: Vec<String>,
    pub enqueued: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub processed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    /// Topics newly marked verified by this run
    pub verified: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayReport {
    pub decayed: usize,
    pub deleted: usize,
}

#[derive(Clone, Copy)]
enum TaskResult {
    Done(f64),
    Retry,
}

pub struct AutonomousAcquisition {
    store: Arc<PersistentStore>,
    search: Arc<EnrichmentService>,
    generator: RwLock<Generator>,
    config: RwLock<KnowledgeAcqConfig>,
    known: Mutex<HashMap<String, KnownTopic>>,
    last_processed: Mutex<Option<DateTime<Utc>>>,
    flights: Arc<SingleFlight>,
}

impl AutonomousAcquisition {
    pub fn new(
        store: Arc<PersistentStore>,
        search: Arc<EnrichmentService>,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: KnowledgeAcqConfig,
    ) -> Self {
        Self {
            store,
            search,
            generator: RwLock::new(Generator::text(provider, provider_config)),
            config: RwLock::new(config),
            known: Mutex::new(HashMap::new()),
            last_processed: Mutex::new(None),
            flights: SingleFlight::new(),
        }
    }

    pub fn configure(
        &self,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: KnowledgeAcqConfig,
    ) {
        *self.generator.write().unwrap_or_else(|e| e.into_inner()) =
            Generator::text(provider, provider_config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    fn config(&self) -> KnowledgeAcqConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn generator(&self) -> Generator {
        self.generator.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn known(&self) -> MutexGuard<'_, HashMap<String, KnownTopic>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuild the known-topic index from persisted terms layers.
    pub async fn rebuild_index(&self) -> usize {
        let records = self.store.records_with(LayerKind::Terms).await;
        let count = {
            let mut known = self.known();
            known.clear();
            for (topic, layer) in records {
                if let Layer::Terms(t) = layer {
                    known.insert(
                        topic,
                        KnownTopic {
                            generated_at: t.generated_at,
                            lang: t.lang,
                            verified: t.verified,
                        },
                    );
                }
            }
            known.len()
        };
        self.prune_known_topics();
        debug!(topics = count, "Known-topic index rebuilt");
        count
    }

    pub fn known_topic(&self, topic: &str) -> Option<KnownTopic> {
        self.known().get(&normalize_subject(topic)).cloned()
    }

    pub fn known_topic_count(&self) -> usize {
        self.known().len()
    }

    /// Evict the oldest-generated topics beyond the cap.
    pub fn prune_known_topics(&self) -> usize {
        let cap = self.config().max_known_topics;
        let mut known = self.known();
        let excess = known.len().saturating_sub(cap);
        if excess == 0 {
            return 0;
        }
        let mut by_age: Vec<(DateTime<Utc>, String)> = known
            .iter()
            .map(|(k, t)| (t.generated_at, k.clone()))
            .collect();
        by_age.sort();
        for (_, key) in by_age.into_iter().take(excess) {
            known.remove(&key);
        }
        excess
    }

    /// Current queue contents.
    pub async fn queue(&self) -> Vec<AcquisitionTask> {
        match self.store.get(QUEUE_SUBJECT, LayerKind::Queue).await {
            Some(Layer::Queue(q)) => q.tasks,
            _ => Vec::new(),
        }
    }

    /// Append tasks not already queued. Returns how many were added.
    pub async fn enqueue(&self, tasks: Vec<AcquisitionTask>) -> usize {
        let mut added = 0;
        self.store
            .update(QUEUE_SUBJECT, LayerKind::Queue, |current| {
                let mut queue = match current {
                    Some(Layer::Queue(q)) => q,
                    _ => QueueLayer::default(),
                };
                for task in tasks {
                    if !queue.tasks.iter().any(|t| t.same_work(&task)) {
                        queue.tasks.push(task);
                        added += 1;
                    }
                }
                Some(Layer::Queue(queue))
            })
            .await;
        added
    }

    fn cooldown(config: &KnowledgeAcqConfig, verified: bool) -> Duration {
        let base = config.topic_cooldown_secs as i64;
        let factor = if verified {
            i64::from(config.verified_cooldown_multiplier)
        } else {
            1
        };
        Duration::seconds(base.saturating_mul(factor))
    }

    /// Whether a topic's terms may be (re)generated at `now`.
    pub fn topic_due(&self, topic: &str, now: DateTime<Utc>) -> bool {
        let config = self.config();
        match self.known_topic(topic) {
            None => true,
            Some(t) => now - t.generated_at >= Self::cooldown(&config, t.verified),
        }
    }

    /// Derive topics from the vision keywords seen on `subject`. The subject
    /// is remembered on each topic so its acquired knowledge can be found
    /// again when that subject is back in focus.
    pub async fn discover(&self, subject: &str, keywords: &str, focus_secs: u64) -> DiscoveryReport {
        self.discover_at(subject, keywords, focus_secs, Utc::now()).await
    }

    pub async fn discover_at(
        &self,
        subject: &str,
        keywords: &str,
        focus_secs: u64,
        now: DateTime<Utc>,
    ) -> DiscoveryReport {
        let subject = normalize_subject(subject);
        let config = self.config();
        let generator = self.generator();
        let mut report = DiscoveryReport::default();
        if !config.enabled || !generator.is_available() {
            return report;
        }
        if keywords.trim().is_empty() || focus_secs < config.min_focus_secs {
            return report;
        }
        let Some(_flight) = self.flights.try_acquire("discover") else {
            return report;
        };

        let topics = match generator
            .complete(
                vec![
                    Message::system(format!(
                        "Extract at most {} distinct, general topics worth learning about from \
                         these activity keywords. One topic per line, no numbering, no other text.",
                        config.max_topics
                    )),
                    Message::user(keywords.trim().to_string()),
                ],
                120,
            )
            .await
        {
            Ok(text) => parse_list(&text, config.max_topics),
            Err(e) => {
                warn!(error = %e, "Topic extraction failed");
                return report;
            }
        };

        for topic in topics {
            let topic = normalize_subject(&topic);
            if topic.is_empty() {
                continue;
            }
            report.topics.push(topic.clone());
            if !self.topic_due(&topic, now) {
                self.link_source(&topic, &subject).await;
                debug!(topic = %topic, "Topic within cooldown, skipped");
                continue;
            }

            let terms = match generator
                .complete(
                    vec![
                        Message::system(format!(
                            "Write at most {} short web search queries (language: {}) that would \
                             teach the essentials of the topic. One per line, no other text.",
                            config.terms_per_topic, config.lang
                        )),
                        Message::user(topic.clone()),
                    ],
                    160,
                )
                .await
            {
                Ok(text) => parse_list(&text, config.terms_per_topic),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Term generation failed");
                    continue;
                }
            };
            if terms.is_empty() {
                continue;
            }

            let mut verified = false;
            let lang = config.lang.clone();
            let stored_terms = terms.clone();
            self.store
                .update(&topic, LayerKind::Terms, |current| {
                    let sources = match current {
                        Some(Layer::Terms(t)) => {
                            verified = t.verified;
                            t.sources
                        }
                        _ => Vec::new(),
                    };
                    let mut layer = TermsLayer {
                        terms: stored_terms,
                        generated_at: now,
                        lang,
                        verified,
                        sources,
                    };
                    layer.add_source(&subject);
                    Some(Layer::Terms(layer))
                })
                .await;
            self.known().insert(
                topic.clone(),
                KnownTopic {
                    generated_at: now,
                    lang: config.lang.clone(),
                    verified,
                },
            );

            let tasks = terms
                .into_iter()
                .map(|term| AcquisitionTask::pending(topic.clone(), term, now))
                .collect();
            report.enqueued += self.enqueue(tasks).await;
            report.generated.push(topic);
        }

        self.prune_known_topics();
        if report.enqueued > 0 {
            info!(
                topics = report.generated.len(),
                enqueued = report.enqueued,
                "Acquisition tasks enqueued"
            );
        }
        report
    }

    /// Add `subject` to an existing topic's sources without regenerating it.
    async fn link_source(&self, topic: &str, subject: &str) {
        if subject.is_empty() {
            return;
        }
        self.store
            .update(topic, LayerKind::Terms, |current| match current {
                Some(Layer::Terms(mut t)) => {
                    t.add_source(subject);
                    Some(Layer::Terms(t))
                }
                other => other,
            })
            .await;
    }

    pub async fn process_queue(&self, max_tasks: usize) -> ProcessReport {
        self.process_queue_at(max_tasks, Utc::now()).await
    }

    /// Run up to `max_tasks` pending searches, then settle the queue.
    ///
    /// Skipped when called within `process_interval_secs` of the last run.
    pub async fn process_queue_at(&self, max_tasks: usize, now: DateTime<Utc>) -> ProcessReport {
        let config = self.config();
        let mut report = ProcessReport::default();
        if !config.enabled || !self.search.is_enabled() {
            return report;
        }
        let Some(_flight) = self.flights.try_acquire("process") else {
            return report;
        };
        {
            let mut last = self.last_processed.lock().unwrap_or_else(|e| e.into_inner());
            let interval = Duration::seconds(config.process_interval_secs as i64);
            if last.is_some_and(|at| now - at < interval) {
                return report;
            }
            *last = Some(now);
        }

        let batch: Vec<AcquisitionTask> = self
            .queue()
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .take(max_tasks)
            .collect();
        let max_chars = self.search.config().max_cached_chars;

        for task in batch {
            report.processed += 1;
            let result = match self
                .search
                .search_with_lang(&task.term, Some(config.lang.as_str()))
                .await
            {
                Ok(results) if !results.is_empty() => {
                    let adequate = results.text.chars().count() >= config.min_result_chars;
                    let confidence = if adequate {
                        config.adequate_confidence
                    } else {
                        config.thin_confidence
                    };
                    self.store
                        .set(
                            &task.term,
                            Layer::Acquired(AcquiredLayer {
                                summary: truncate_chars(&results.text, max_chars),
                                topic: task.topic.clone(),
                                term: task.term.clone(),
                                confidence,
                                original_confidence: confidence,
                                searched_at: now,
                            }),
                        )
                        .await;
                    TaskResult::Done(confidence)
                }
                Ok(_) => {
                    debug!(term = %task.term, "Search returned nothing");
                    TaskResult::Retry
                }
                Err(e) => {
                    debug!(term = %task.term, error = %e, "Acquisition search failed");
                    TaskResult::Retry
                }
            };

            let max_retries = config.max_retries;
            let mut exhausted = false;
            self.store
                .update(QUEUE_SUBJECT, LayerKind::Queue, |current| {
                    let mut queue = match current {
                        Some(Layer::Queue(q)) => q,
                        _ => QueueLayer::default(),
                    };
                    if let Some(entry) = queue.tasks.iter_mut().find(|t| t.same_work(&task)) {
                        match result {
                            TaskResult::Done(confidence) => {
                                entry.status = TaskStatus::Done;
                                entry.confidence = Some(confidence);
                            }
                            TaskResult::Retry => {
                                entry.retries += 1;
                                if entry.retries >= max_retries {
                                    entry.status = TaskStatus::Failed;
                                    exhausted = true;
                                }
                            }
                        }
                    }
                    Some(Layer::Queue(queue))
                })
                .await;

            match result {
                TaskResult::Done(_) => report.succeeded += 1,
                TaskResult::Retry if exhausted => report.failed += 1,
                TaskResult::Retry => report.retried += 1,
            }
        }

        report.verified = self.settle_queue(&config, now).await;
        for topic in &report.verified {
            self.mark_verified(topic).await;
        }
        if report.processed > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                "Acquisition queue processed"
            );
        }
        report
    }

    /// Count verification evidence, then drop failed tasks and expired done
    /// tasks. Returns topics that crossed the verification threshold.
    async fn settle_queue(&self, config: &KnowledgeAcqConfig, now: DateTime<Utc>) -> Vec<String> {
        let mut strong: BTreeMap<String, usize> = BTreeMap::new();
        let ttl = Duration::hours(config.done_ttl_hours as i64);
        let threshold = config.adequate_confidence;

        self.store
            .update(QUEUE_SUBJECT, LayerKind::Queue, |current| {
                let mut queue = match current {
                    Some(Layer::Queue(q)) => q,
                    _ => return None,
                };
                for task in &queue.tasks {
                    if task.status == TaskStatus::Done
                        && task.confidence.is_some_and(|c| c >= threshold)
                    {
                        *strong.entry(task.topic.clone()).or_default() += 1;
                    }
                }
                queue.tasks.retain(|t| match t.status {
                    TaskStatus::Pending => true,
                    TaskStatus::Failed => false,
                    TaskStatus::Done => now - t.added_at < ttl,
                });
                Some(Layer::Queue(queue))
            })
            .await;

        strong
            .into_iter()
            .filter(|(_, count)| *count >= config.verify_threshold)
            .map(|(topic, _)| topic)
            .filter(|topic| !self.known_topic(topic).is_some_and(|t| t.verified))
            .collect()
    }

    /// Verification only ever escalates.
    async fn mark_verified(&self, topic: &str) {
        self.store
            .update(topic, LayerKind::Terms, |current| match current {
                Some(Layer::Terms(mut t)) => {
                    t.verified = true;
                    Some(Layer::Terms(t))
                }
                other => other,
            })
            .await;
        let key = normalize_subject(topic);
        let mut known = self.known();
        match known.get_mut(&key) {
            Some(entry) => entry.verified = true,
            None => {
                known.insert(
                    key,
                    KnownTopic {
                        generated_at: Utc::now(),
                        lang: self.config().lang,
                        verified: true,
                    },
                );
            }
        }
        info!(topic, "Topic verified");
    }

    pub async fn decay_knowledge(&self) -> DecayReport {
        self.decay_knowledge_at(Utc::now()).await
    }

    /// Lower acquired confidence by `decay_per_week` for every whole week of
    /// age, computed from the original confidence. Entries at or below the
    /// delete threshold are removed.
    pub async fn decay_knowledge_at(&self, now: DateTime<Utc>) -> DecayReport {
        let config = self.config();
        let mut report = DecayReport::default();

        for (subject, layer) in self.store.records_with(LayerKind::Acquired).await {
            let Layer::Acquired(entry) = layer else {
                continue;
            };
            let age_days = (now - entry.searched_at).num_days();
            if age_days <= config.decay_after_days as i64 {
                continue;
            }
            let weeks = (age_days / 7) as f64;
            let decayed = round2(entry.original_confidence - config.decay_per_week * weeks);

            if decayed <= config.delete_at_or_below {
                self.store.remove(&subject, LayerKind::Acquired).await;
                report.deleted += 1;
            } else if (decayed - entry.confidence).abs() > f64::EPSILON {
                self.store
                    .set(
                        &subject,
                        Layer::Acquired(AcquiredLayer {
                            confidence: decayed,
                            ..entry
                        }),
                    )
                    .await;
                report.decayed += 1;
            }
        }

        if report.decayed + report.deleted > 0 {
            info!(decayed = report.decayed, deleted = report.deleted, "Acquired knowledge decayed");
        }
        report
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
