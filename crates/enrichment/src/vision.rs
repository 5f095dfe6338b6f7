//! Vision extractor: keywords and an enriched title from a screenshot.
//!
//! Gated by the noise filter, a minimum focus time and per-subject backoff;
//! only one extraction runs at a time across all subjects. The model answers
//! `keywords | title`, either side optional. Results are applied only if the
//! cycle that launched the extraction is still current.

use chrono::{DateTime, Utc};
use focuslens_config::{ProviderConfig, VlmConfig};
use focuslens_core::cycle::{CycleGuard, CycleToken};
use focuslens_core::layer::{Layer, LayerKind, VlmLayer};
use focuslens_core::message::{ImageRef, Message};
use focuslens_core::provider::Provider;
use focuslens_core::session_keys::{VLM_ENRICHED_TITLE, VLM_KEYWORDS, VLM_SUBJECT};
use focuslens_core::subject::{is_noise_subject, normalize_subject, truncate_chars};
use focuslens_memory::{PersistentStore, SessionStore};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, BackoffTable, SingleFlight};
use crate::llm::Generator;

const FLIGHT_KEY: &str = "vision";

const PROMPT: &str = "Look at this screenshot of the user's focused window. \
Reply on one line as: comma-separated keywords describing what the user is doing | a short descriptive title. \
Either part may be empty. No other text.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionOutcome {
    Skipped(&'static str),
    /// A later cycle started before the result arrived; nothing was applied.
    Superseded,
    Extracted { keywords: String, title: String },
    Failed,
}

/// Split a `keywords | title` answer. Without a `|` the whole answer is
/// keywords.
pub fn parse_answer(text: &str) -> (String, String) {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    match line.split_once('|') {
        Some((keywords, title)) => (keywords.trim().to_string(), title.trim().to_string()),
        None => (line.trim().to_string(), String::new()),
    }
}

pub struct VisionExtractor {
    store: Arc<PersistentStore>,
    session: Arc<SessionStore>,
    cycles: Arc<CycleGuard>,
    generator: RwLock<Generator>,
    config: RwLock<VlmConfig>,
    noise: RwLock<Vec<String>>,
    backoff: BackoffTable,
    flights: Arc<SingleFlight>,
}

impl VisionExtractor {
    pub fn new(
        store: Arc<PersistentStore>,
        session: Arc<SessionStore>,
        cycles: Arc<CycleGuard>,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: VlmConfig,
    ) -> Self {
        Self {
            store,
            session,
            cycles,
            generator: RwLock::new(Generator::vision(provider, provider_config)),
            backoff: BackoffTable::new(config.max_tracked_subjects),
            config: RwLock::new(config),
            noise: RwLock::new(Vec::new()),
            flights: SingleFlight::new(),
        }
    }

    pub fn configure(
        &self,
        provider: Option<Arc<dyn Provider>>,
        provider_config: &ProviderConfig,
        config: VlmConfig,
        noise_subjects: Vec<String>,
    ) {
        *self.generator.write().unwrap_or_else(|e| e.into_inner()) =
            Generator::vision(provider, provider_config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        *self.noise.write().unwrap_or_else(|e| e.into_inner()) = noise_subjects;
    }

    fn config(&self) -> VlmConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn policy(config: &VlmConfig) -> BackoffPolicy {
        BackoffPolicy::new(config.min_interval_secs, config.max_interval_secs)
    }

    /// Whether an extraction is currently running.
    pub fn is_busy(&self) -> bool {
        self.flights.is_active(FLIGHT_KEY)
    }

    /// Re-seed backoff from persisted vlm layers: the interval is the
    /// minimum doubled once per earlier update, capped.
    pub async fn recover(&self) -> usize {
        let policy = Self::policy(&self.config());
        let mut seeded = 0;
        for (subject, layer) in self.store.records_with(LayerKind::Vlm).await {
            if let Layer::Vlm(v) = layer {
                let interval = policy.after_attempts(v.update_count.max(1));
                self.backoff.seed(&subject, v.last_updated, interval);
                seeded += 1;
            }
        }
        seeded
    }

    pub fn reset(&self, subject: &str) -> bool {
        self.backoff.reset(&normalize_subject(subject))
    }

    pub fn interval(&self, subject: &str) -> Option<u64> {
        self.backoff
            .get(&normalize_subject(subject))
            .map(|e| e.interval_secs)
    }

    pub async fn maybe_extract(
        &self,
        subject: &str,
        image: ImageRef,
        focus_secs: u64,
        token: CycleToken,
    ) -> VisionOutcome {
        self.maybe_extract_at(subject, image, focus_secs, token, Utc::now())
            .await
    }

    pub async fn maybe_extract_at(
        &self,
        subject: &str,
        image: ImageRef,
        focus_secs: u64,
        token: CycleToken,
        now: DateTime<Utc>,
    ) -> VisionOutcome {
        let config = self.config();
        let generator = self.generator.read().unwrap_or_else(|e| e.into_inner()).clone();
        if !config.enabled || !generator.is_available() {
            return VisionOutcome::Skipped("disabled");
        }
        let subject = normalize_subject(subject);
        let noisy = {
            let extra = self.noise.read().unwrap_or_else(|e| e.into_inner());
            is_noise_subject(&subject, &extra)
        };
        if noisy {
            return VisionOutcome::Skipped("noise");
        }
        if focus_secs < config.min_focus_secs {
            return VisionOutcome::Skipped("focus");
        }
        if !self.backoff.is_due(&subject, now) {
            return VisionOutcome::Skipped("backoff");
        }
        let Some(_flight) = self.flights.try_acquire(FLIGHT_KEY) else {
            return VisionOutcome::Skipped("in_flight");
        };

        let interval = self.backoff.record_attempt(&subject, now, Self::policy(&config));
        let messages = vec![
            Message::system(PROMPT),
            Message::user(format!("Window title: {subject}")).with_image(image),
        ];

        let answer = match generator.complete(messages, 120).await {
            Ok(text) => text,
            Err(e) => {
                warn!(subject = %subject, error = %e, interval, "Vision extraction failed");
                return VisionOutcome::Failed;
            }
        };
        let (keywords, title) = parse_answer(&answer);
        let keywords = truncate_chars(&keywords, config.max_keyword_chars);
        let title = truncate_chars(&title, config.max_title_chars);
        if keywords.is_empty() && title.is_empty() {
            debug!(subject = %subject, "Vision answer had no usable fields");
            return VisionOutcome::Failed;
        }

        if !self.cycles.is_current(token) {
            debug!(subject = %subject, "Vision result superseded, discarded");
            return VisionOutcome::Superseded;
        }

        self.store
            .update(&subject, LayerKind::Vlm, |current| {
                let previous = match current {
                    Some(Layer::Vlm(v)) => Some(v),
                    _ => None,
                };
                let update_count = previous.as_ref().map_or(0, |v| v.update_count) + 1;
                let (old_summary, old_title) = previous
                    .map(|v| (v.summary, v.enriched_title))
                    .unwrap_or_default();
                Some(Layer::Vlm(VlmLayer {
                    summary: if keywords.is_empty() { old_summary } else { keywords.clone() },
                    enriched_title: if title.is_empty() { old_title } else { title.clone() },
                    last_updated: now,
                    update_count,
                }))
            })
            .await;

        self.session.set(VLM_SUBJECT, subject.clone()).await;
        if !keywords.is_empty() {
            self.session.set(VLM_KEYWORDS, keywords.clone()).await;
        }
        if !title.is_empty() {
            self.session.set(VLM_ENRICHED_TITLE, title.clone()).await;
        }

        info!(subject = %subject, interval, "Vision enrichment applied");
        VisionOutcome::Extracted { keywords, title }
    }
}
