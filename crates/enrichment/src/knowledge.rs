//! Summary store: LLM-written background notes per subject.
//!
//! Consulted only when retrieval confidence is low. A subject that already
//! has a strong (> `high_confidence`) match is reinforced instead: no
//! generation, but the backoff still doubles. Failures leave the previous
//! summary in place and also double the backoff. A summary that finishes
//! after a newer focus cycle began is discarded.

use chrono::{DateTime, Utc};
use focuslens_config::{KnowledgeConfig, ProviderConfig};
use focuslens_core::cycle::{CycleGuard, CycleToken};
use focuslens_core::layer::{KnowledgeLayer, Layer, LayerKind, QueryOptions};
use focuslens_core::message::Message;
use focuslens_core::provider::Provider;
use focuslens_core::subject::{normalize_subject, truncate_chars};
use focuslens_memory::PersistentStore;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, BackoffTable, SingleFlight};
use crate::llm::Generator;

/// What a call to [`SummaryStore::maybe_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Disabled,
    NoInput,
    NotDue,
    InFlight,
    /// A strong match already exists; backoff doubled, nothing generated.
    Reinforced,
    Updated,
    Failed,
    /// Generated, but a later cycle began first; nothing written.
    Superseded,
}

pub struct SummaryStore {
    store: Arc<PersistentStore>,
    cycles: Arc<CycleGuard>,
    generator: RwLock<Generator>,
    config: RwLock<KnowledgeConfig>,
    backoff: BackoffTable,
    flights: Arc<SingleFlight>,
}

impl SummaryStore {
    pub fn new(
        store: Arc<PersistentStore>,
        cycles: Arc<CycleGuard>,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            store,
            cycles,
            generator: RwLock::new(Generator::text(provider, provider_config)),
            backoff: BackoffTable::new(config.max_tracked_subjects),
            config: RwLock::new(config),
            flights: SingleFlight::new(),
        }
    }

    pub fn configure(
        &self,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: KnowledgeConfig,
    ) {
        *self.generator.write().unwrap_or_else(|e| e.into_inner()) =
            Generator::text(provider, provider_config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> KnowledgeConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn generator(&self) -> Generator {
        self.generator.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn policy(config: &KnowledgeConfig) -> BackoffPolicy {
        BackoffPolicy::new(config.min_interval_secs, config.max_interval_secs)
    }

    /// Re-seed backoff from persisted knowledge layers so a restart keeps
    /// each subject's schedule.
    pub async fn recover(&self) -> usize {
        let policy = Self::policy(&self.config());
        let mut seeded = 0;
        for (subject, layer) in self.store.records_with(LayerKind::Knowledge).await {
            if let Layer::Knowledge(k) = layer {
                self.backoff
                    .seed(&subject, k.last_updated, policy.clamp(k.current_interval));
                seeded += 1;
            }
        }
        debug!(seeded, "Summary backoff recovered");
        seeded
    }

    /// Clear a subject's backoff.
    pub fn reset(&self, subject: &str) -> bool {
        self.backoff.reset(&normalize_subject(subject))
    }

    /// Current backoff interval for a subject, if tracked.
    pub fn interval(&self, subject: &str) -> Option<u64> {
        self.backoff
            .get(&normalize_subject(subject))
            .map(|e| e.interval_secs)
    }

    pub async fn maybe_update(
        &self,
        subject: &str,
        search_text: &str,
        token: CycleToken,
    ) -> UpdateOutcome {
        self.maybe_update_at(subject, search_text, token, Utc::now()).await
    }

    pub async fn maybe_update_at(
        &self,
        subject: &str,
        search_text: &str,
        token: CycleToken,
        now: DateTime<Utc>,
    ) -> UpdateOutcome {
        let config = self.config();
        let generator = self.generator();
        if !config.enabled || !generator.is_available() {
            return UpdateOutcome::Disabled;
        }
        let subject = normalize_subject(subject);
        if subject.is_empty() || search_text.trim().is_empty() {
            return UpdateOutcome::NoInput;
        }
        if !self.backoff.is_due(&subject, now) {
            return UpdateOutcome::NotDue;
        }
        let Some(_flight) = self.flights.try_acquire(&subject) else {
            return UpdateOutcome::InFlight;
        };

        let policy = Self::policy(&config);
        let related = self
            .store
            .query(
                &subject,
                &QueryOptions::layer(LayerKind::Knowledge).max_results(config.related_limit.max(1)),
            )
            .await;

        if related
            .first()
            .is_some_and(|top| top.confidence > config.high_confidence)
        {
            let interval = self.backoff.record_attempt(&subject, now, policy);
            debug!(subject = %subject, interval, "Knowledge already strong, reinforced");
            return UpdateOutcome::Reinforced;
        }

        let interval = self.backoff.record_attempt(&subject, now, policy);

        let notes: Vec<String> = related
            .iter()
            .filter_map(|r| match &r.data {
                Layer::Knowledge(k) => Some(format!("- {}: {}", r.subject, k.summary)),
                _ => None,
            })
            .collect();
        let messages = vec![
            Message::system(format!(
                "You keep short background notes about what a user is working on. \
                 Reply with one plain-text note of at most {} characters. No preamble.",
                config.max_summary_chars
            )),
            Message::user(prompt(&subject, search_text, &notes)),
        ];

        let summary = match generator.complete(messages, 200).await {
            Ok(text) => truncate_chars(&text, config.max_summary_chars),
            Err(e) => {
                warn!(subject = %subject, error = %e, interval, "Knowledge update failed");
                return UpdateOutcome::Failed;
            }
        };

        if !self.cycles.is_current(token) {
            debug!(subject = %subject, "Knowledge summary superseded, discarded");
            return UpdateOutcome::Superseded;
        }

        self.store
            .update(&subject, LayerKind::Knowledge, |current| {
                let update_count = match current {
                    Some(Layer::Knowledge(k)) => k.update_count + 1,
                    _ => 1,
                };
                Some(Layer::Knowledge(KnowledgeLayer {
                    summary,
                    last_updated: now,
                    update_count,
                    current_interval: interval,
                }))
            })
            .await;
        info!(subject = %subject, interval, "Knowledge summary updated");
        UpdateOutcome::Updated
    }
}

fn prompt(subject: &str, search_text: &str, notes: &[String]) -> String {
    let mut prompt = format!("Subject: {subject}\n\nSearch results:\n{}", search_text.trim());
    if !notes.is_empty() {
        prompt.push_str("\n\nRelated notes:\n");
        prompt.push_str(&notes.join("\n"));
    }
    prompt
}
