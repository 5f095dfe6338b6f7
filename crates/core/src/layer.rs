//! Persistent knowledge layers: the durable per-subject record model.
//!
//! Each subject owns one [`SubjectRecord`] holding independent named layers.
//! Layers are a closed sum type ([`Layer`]) with one schema per layer rather
//! than an open-ended dictionary. A record whose last layer is removed is
//! deleted by the store, never kept empty.
//!
//! Durable storage is an opaque load/save of the whole [`KnowledgeSnapshot`]
//! through a [`PersistenceBackend`].

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Subjects whose key starts with this prefix are internal bookkeeping
/// records (e.g. the acquisition queue) and exempt from usage-based pruning.
pub const RESERVED_PREFIX: &str = "__";

/// Key of the record holding the acquisition task queue.
pub const QUEUE_SUBJECT: &str = "__acquisition_queue__";

/// Source subjects remembered per topic.
pub const MAX_TOPIC_SOURCES: usize = 8;

/// The full durable mapping: normalized subject → record.
pub type KnowledgeSnapshot = BTreeMap<String, SubjectRecord>;

/// Names of the layers a record can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Memory,
    Knowledge,
    Vlm,
    Search,
    Acquired,
    Terms,
    Queue,
}

impl LayerKind {
    pub const ALL: [LayerKind; 7] = [
        LayerKind::Memory,
        LayerKind::Knowledge,
        LayerKind::Vlm,
        LayerKind::Search,
        LayerKind::Acquired,
        LayerKind::Terms,
        LayerKind::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Knowledge => "knowledge",
            Self::Vlm => "vlm",
            Self::Search => "search",
            Self::Acquired => "acquired",
            Self::Terms => "terms",
            Self::Queue => "queue",
        }
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated focus time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLayer {
    pub total_sec: u64,
    pub last_seen: DateTime<Utc>,
    /// Number of distinct days the subject was seen
    pub day_count: u32,
    /// `YYYY-MM-DD` → seconds, most recent days only
    #[serde(default)]
    pub recent_days: BTreeMap<String, u64>,
}

/// LLM-generated background summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeLayer {
    pub summary: String,
    pub last_updated: DateTime<Utc>,
    pub update_count: u32,
    /// Backoff interval in force after the last update, in seconds
    pub current_interval: u64,
}

/// Vision-derived keywords and enriched title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlmLayer {
    /// Keyword summary
    pub summary: String,
    pub enriched_title: String,
    pub last_updated: DateTime<Utc>,
    pub update_count: u32,
}

/// Cached raw search text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLayer {
    pub results: String,
    pub cached_at: DateTime<Utc>,
}

/// Knowledge acquired autonomously for one search term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquiredLayer {
    pub summary: String,
    pub topic: String,
    pub term: String,
    /// Current (possibly decayed) trust
    pub confidence: f64,
    /// Trust at acquisition time; decay is always computed from this
    pub original_confidence: f64,
    pub searched_at: DateTime<Utc>,
}

/// Search terms generated for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsLayer {
    pub terms: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub lang: String,
    #[serde(default)]
    pub verified: bool,
    /// Subjects whose vision keywords led to this topic, most recent last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl TermsLayer {
    /// Record `subject` as a source, moving it to the most recent slot.
    pub fn add_source(&mut self, subject: &str) {
        if subject.is_empty() {
            return;
        }
        self.sources.retain(|s| s != subject);
        self.sources.push(subject.to_string());
        let excess = self.sources.len().saturating_sub(MAX_TOPIC_SOURCES);
        self.sources.drain(..excess);
    }
}

/// Lifecycle of an acquisition task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
}

/// One (topic, term) search to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionTask {
    pub topic: String,
    pub term: String,
    pub status: TaskStatus,
    pub retries: u32,
    pub added_at: DateTime<Utc>,
    /// Confidence the task resolved at, once done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AcquisitionTask {
    pub fn pending(topic: impl Into<String>, term: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            term: term.into(),
            status: TaskStatus::Pending,
            retries: 0,
            added_at: now,
            confidence: None,
        }
    }

    pub fn same_work(&self, other: &AcquisitionTask) -> bool {
        self.topic == other.topic && self.term == other.term
    }
}

/// The acquisition queue payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueLayer {
    pub tasks: Vec<AcquisitionTask>,
}

/// One layer payload, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Memory(MemoryLayer),
    Knowledge(KnowledgeLayer),
    Vlm(VlmLayer),
    Search(SearchLayer),
    Acquired(AcquiredLayer),
    Terms(TermsLayer),
    Queue(QueueLayer),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Memory(_) => LayerKind::Memory,
            Self::Knowledge(_) => LayerKind::Knowledge,
            Self::Vlm(_) => LayerKind::Vlm,
            Self::Search(_) => LayerKind::Search,
            Self::Acquired(_) => LayerKind::Acquired,
            Self::Terms(_) => LayerKind::Terms,
            Self::Queue(_) => LayerKind::Queue,
        }
    }

    /// An empty payload is stored as "no layer".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Memory(m) => m.total_sec == 0 && m.recent_days.is_empty(),
            Self::Knowledge(k) => k.summary.trim().is_empty(),
            Self::Vlm(v) => v.summary.trim().is_empty() && v.enriched_title.trim().is_empty(),
            Self::Search(s) => s.results.trim().is_empty(),
            Self::Acquired(a) => a.summary.trim().is_empty(),
            Self::Terms(t) => t.terms.is_empty(),
            Self::Queue(q) => q.tasks.is_empty(),
        }
    }
}

/// All layers stored for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<KnowledgeLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm: Option<VlmLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired: Option<AcquiredLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<TermsLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueLayer>,
}

impl SubjectRecord {
    pub fn get(&self, kind: LayerKind) -> Option<Layer> {
        match kind {
            LayerKind::Memory => self.memory.clone().map(Layer::Memory),
            LayerKind::Knowledge => self.knowledge.clone().map(Layer::Knowledge),
            LayerKind::Vlm => self.vlm.clone().map(Layer::Vlm),
            LayerKind::Search => self.search.clone().map(Layer::Search),
            LayerKind::Acquired => self.acquired.clone().map(Layer::Acquired),
            LayerKind::Terms => self.terms.clone().map(Layer::Terms),
            LayerKind::Queue => self.queue.clone().map(Layer::Queue),
        }
    }

    pub fn has(&self, kind: LayerKind) -> bool {
        match kind {
            LayerKind::Memory => self.memory.is_some(),
            LayerKind::Knowledge => self.knowledge.is_some(),
            LayerKind::Vlm => self.vlm.is_some(),
            LayerKind::Search => self.search.is_some(),
            LayerKind::Acquired => self.acquired.is_some(),
            LayerKind::Terms => self.terms.is_some(),
            LayerKind::Queue => self.queue.is_some(),
        }
    }

    /// Replace a whole layer payload.
    pub fn put(&mut self, layer: Layer) {
        match layer {
            Layer::Memory(p) => self.memory = Some(p),
            Layer::Knowledge(p) => self.knowledge = Some(p),
            Layer::Vlm(p) => self.vlm = Some(p),
            Layer::Search(p) => self.search = Some(p),
            Layer::Acquired(p) => self.acquired = Some(p),
            Layer::Terms(p) => self.terms = Some(p),
            Layer::Queue(p) => self.queue = Some(p),
        }
    }

    /// Remove a layer. Returns whether it was present.
    pub fn remove(&mut self, kind: LayerKind) -> bool {
        match kind {
            LayerKind::Memory => self.memory.take().is_some(),
            LayerKind::Knowledge => self.knowledge.take().is_some(),
            LayerKind::Vlm => self.vlm.take().is_some(),
            LayerKind::Search => self.search.take().is_some(),
            LayerKind::Acquired => self.acquired.take().is_some(),
            LayerKind::Terms => self.terms.take().is_some(),
            LayerKind::Queue => self.queue.take().is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        LayerKind::ALL.iter().all(|k| !self.has(*k))
    }

    pub fn layer_count(&self) -> usize {
        LayerKind::ALL.iter().filter(|k| self.has(**k)).count()
    }
}

/// A query against one layer of the persistent store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Which layer to search
    pub layer: LayerKind,

    /// Maximum number of results
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum similarity threshold
    #[serde(default)]
    pub min_confidence: f64,

    /// Union each stored subject's tokens with its vision keywords
    #[serde(default)]
    pub enrich_with_vlm: bool,
}

fn default_max_results() -> usize {
    5
}

impl QueryOptions {
    pub fn layer(layer: LayerKind) -> Self {
        Self {
            layer,
            max_results: default_max_results(),
            min_confidence: 0.0,
            enrich_with_vlm: false,
        }
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    pub fn enrich_with_vlm(mut self) -> Self {
        self.enrich_with_vlm = true;
        self
    }
}

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// The stored subject that matched
    pub subject: String,
    /// Token-set similarity in [0, 1]
    pub confidence: f64,
    /// The matched layer payload
    pub data: Layer,
}

/// Durable storage for the knowledge snapshot.
///
/// Implementations: JSON file, in-memory (for testing), none (no-op).
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// The backend name (e.g., "file", "memory", "none").
    fn name(&self) -> &str;

    /// Load the last saved snapshot. Absence of prior data is `Ok(None)`.
    async fn load(&self) -> std::result::Result<Option<KnowledgeSnapshot>, StoreError>;

    /// Replace the saved snapshot.
    async fn save(&self, snapshot: &KnowledgeSnapshot) -> std::result::Result<(), StoreError>;
}
