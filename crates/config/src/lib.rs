//! Configuration loading, validation, and management for FocusLens.
//!
//! Loads configuration from `~/.focuslens/config.toml` with environment
//! variable overrides. Every enrichment sub-policy (enabled flags, thresholds,
//! intervals) lives in its own section with defaults, so a partial file or no
//! file at all yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.focuslens/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generative provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Web search enrichment
    #[serde(default)]
    pub search: SearchConfig,

    /// Knowledge summarizer
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Vision extraction
    #[serde(default)]
    pub vlm: VlmConfig,

    /// Autonomous knowledge acquisition
    #[serde(default)]
    pub knowledge_acq: KnowledgeAcqConfig,

    /// Activity tracking and store limits
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Context assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// Extra subjects never worth enriching (compared case-insensitively)
    #[serde(default)]
    pub noise_subjects: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Provider ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name used in logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model for text generation
    #[serde(default = "default_model")]
    pub model: String,

    /// Model for image requests (falls back to `model`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Upper bound on a single generative call
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openrouter".into()
}
fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_provider_timeout() -> u64 {
    20
}

impl ProviderConfig {
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            vision_model: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Search ────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Lookup backend ("brave")
    #[serde(default = "default_search_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_results")]
    pub max_results: usize,

    /// Minimum seconds between two searches
    #[serde(default = "default_search_interval")]
    pub min_interval_secs: u64,

    /// Minimum tracked focus on a subject before searching it
    #[serde(default = "default_search_min_focus")]
    pub min_focus_secs: u64,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Jaccard threshold for "related" subjects
    #[serde(default = "default_related_threshold")]
    pub related_threshold: f64,

    /// Cached search text kept in the session store, in chars
    #[serde(default = "default_cached_chars")]
    pub max_cached_chars: usize,
}

fn default_search_provider() -> String {
    "brave".into()
}
fn default_search_results() -> usize {
    5
}
fn default_search_interval() -> u64 {
    60
}
fn default_search_min_focus() -> u64 {
    10
}
fn default_search_timeout() -> u64 {
    15
}
fn default_related_threshold() -> f64 {
    0.3
}
fn default_cached_chars() -> usize {
    500
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_search_provider(),
            api_key: None,
            max_results: default_search_results(),
            min_interval_secs: default_search_interval(),
            min_focus_secs: default_search_min_focus(),
            timeout_secs: default_search_timeout(),
            related_threshold: default_related_threshold(),
            max_cached_chars: default_cached_chars(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("enabled", &self.enabled)
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .field("min_interval_secs", &self.min_interval_secs)
            .field("min_focus_secs", &self.min_focus_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("related_threshold", &self.related_threshold)
            .field("max_cached_chars", &self.max_cached_chars)
            .finish()
    }
}

// ── Knowledge summarizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_knowledge_min_interval")]
    pub min_interval_secs: u64,

    #[serde(default = "default_knowledge_max_interval")]
    pub max_interval_secs: u64,

    /// Retrieval confidence above which a summary is left alone
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,

    #[serde(default = "default_summary_chars")]
    pub max_summary_chars: usize,

    /// Related summaries fed into the prompt
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,

    /// Backoff entries kept in memory
    #[serde(default = "default_tracked_subjects")]
    pub max_tracked_subjects: usize,
}

fn default_knowledge_min_interval() -> u64 {
    300
}
fn default_knowledge_max_interval() -> u64 {
    86_400
}
fn default_high_confidence() -> f64 {
    0.7
}
fn default_summary_chars() -> usize {
    200
}
fn default_related_limit() -> usize {
    3
}
fn default_tracked_subjects() -> usize {
    256
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: default_knowledge_min_interval(),
            max_interval_secs: default_knowledge_max_interval(),
            high_confidence: default_high_confidence(),
            max_summary_chars: default_summary_chars(),
            related_limit: default_related_limit(),
            max_tracked_subjects: default_tracked_subjects(),
        }
    }
}

// ── Vision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vlm_min_interval")]
    pub min_interval_secs: u64,

    #[serde(default = "default_vlm_max_interval")]
    pub max_interval_secs: u64,

    /// Minimum tracked focus on a subject before extracting
    #[serde(default = "default_vlm_min_focus")]
    pub min_focus_secs: u64,

    #[serde(default = "default_summary_chars")]
    pub max_keyword_chars: usize,

    #[serde(default = "default_title_chars")]
    pub max_title_chars: usize,

    #[serde(default = "default_tracked_subjects")]
    pub max_tracked_subjects: usize,
}

fn default_vlm_min_interval() -> u64 {
    120
}
fn default_vlm_max_interval() -> u64 {
    21_600
}
fn default_vlm_min_focus() -> u64 {
    30
}
fn default_title_chars() -> usize {
    80
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: default_vlm_min_interval(),
            max_interval_secs: default_vlm_max_interval(),
            min_focus_secs: default_vlm_min_focus(),
            max_keyword_chars: default_summary_chars(),
            max_title_chars: default_title_chars(),
            max_tracked_subjects: default_tracked_subjects(),
        }
    }
}

// ── Autonomous acquisition ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeAcqConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_acq_min_focus")]
    pub min_focus_secs: u64,

    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    #[serde(default = "default_terms_per_topic")]
    pub terms_per_topic: usize,

    /// Regeneration cooldown for an unverified topic
    #[serde(default = "default_topic_cooldown")]
    pub topic_cooldown_secs: u64,

    /// Cooldown multiplier once a topic is verified
    #[serde(default = "default_verified_multiplier")]
    pub verified_cooldown_multiplier: u32,

    #[serde(default = "default_tasks_per_run")]
    pub max_tasks_per_run: usize,

    /// Minimum seconds between two queue-processing runs
    #[serde(default = "default_process_interval")]
    pub process_interval_secs: u64,

    /// Result length (chars) considered adequate
    #[serde(default = "default_min_result_chars")]
    pub min_result_chars: usize,

    #[serde(default = "default_adequate_confidence")]
    pub adequate_confidence: f64,

    #[serde(default = "default_thin_confidence")]
    pub thin_confidence: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// High-confidence done tasks needed to verify a topic
    #[serde(default = "default_verify_threshold")]
    pub verify_threshold: usize,

    /// Hours a done task stays in the queue
    #[serde(default = "default_done_ttl")]
    pub done_ttl_hours: u64,

    #[serde(default = "default_decay_after")]
    pub decay_after_days: u64,

    /// Confidence lost per elapsed week
    #[serde(default = "default_decay_per_week")]
    pub decay_per_week: f64,

    /// Entries decayed to or below this are deleted
    #[serde(default = "default_delete_below")]
    pub delete_at_or_below: f64,

    #[serde(default = "default_max_known_topics")]
    pub max_known_topics: usize,

    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_acq_min_focus() -> u64 {
    60
}
fn default_max_topics() -> usize {
    3
}
fn default_terms_per_topic() -> usize {
    3
}
fn default_topic_cooldown() -> u64 {
    6 * 3600
}
fn default_verified_multiplier() -> u32 {
    24
}
fn default_tasks_per_run() -> usize {
    2
}
fn default_process_interval() -> u64 {
    60
}
fn default_min_result_chars() -> usize {
    200
}
fn default_adequate_confidence() -> f64 {
    0.8
}
fn default_thin_confidence() -> f64 {
    0.2
}
fn default_max_retries() -> u32 {
    3
}
fn default_verify_threshold() -> usize {
    3
}
fn default_done_ttl() -> u64 {
    24
}
fn default_decay_after() -> u64 {
    7
}
fn default_decay_per_week() -> f64 {
    0.1
}
fn default_delete_below() -> f64 {
    0.1
}
fn default_max_known_topics() -> usize {
    500
}
fn default_lang() -> String {
    "en".into()
}

impl Default for KnowledgeAcqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_focus_secs: default_acq_min_focus(),
            max_topics: default_max_topics(),
            terms_per_topic: default_terms_per_topic(),
            topic_cooldown_secs: default_topic_cooldown(),
            verified_cooldown_multiplier: default_verified_multiplier(),
            max_tasks_per_run: default_tasks_per_run(),
            process_interval_secs: default_process_interval(),
            min_result_chars: default_min_result_chars(),
            adequate_confidence: default_adequate_confidence(),
            thin_confidence: default_thin_confidence(),
            max_retries: default_max_retries(),
            verify_threshold: default_verify_threshold(),
            done_ttl_hours: default_done_ttl(),
            decay_after_days: default_decay_after(),
            decay_per_week: default_decay_per_week(),
            delete_at_or_below: default_delete_below(),
            max_known_topics: default_max_known_topics(),
            lang: default_lang(),
        }
    }
}

// ── Memory / stores ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// How often tracked focus time is merged into the persistent store
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Subjects unseen for longer than this are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_recent_days")]
    pub recent_days: usize,

    /// Cap on persistent subjects
    #[serde(default = "default_max_subjects")]
    pub max_subjects: usize,

    /// Cap on session store entries
    #[serde(default = "default_session_entries")]
    pub session_max_entries: usize,

    /// Knowledge file (defaults to `~/.focuslens/knowledge.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

fn default_flush_interval() -> u64 {
    60
}
fn default_retention_days() -> u64 {
    90
}
fn default_recent_days() -> usize {
    7
}
fn default_max_subjects() -> usize {
    500
}
fn default_session_entries() -> usize {
    256
}

impl MemoryConfig {
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("knowledge.json"))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            retention_days: default_retention_days(),
            recent_days: default_recent_days(),
            max_subjects: default_max_subjects(),
            session_max_entries: default_session_entries(),
            store_path: None,
        }
    }
}

// ── Context assembly ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total character budget of the context block
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// A section is truncated into the remainder only if more than this
    /// many chars remain
    #[serde(default = "default_min_truncate")]
    pub min_truncate_chars: usize,

    /// Alphanumeric runs at least this long are masked
    #[serde(default = "default_mask_run")]
    pub mask_run_chars: usize,
}

fn default_budget_chars() -> usize {
    2500
}
fn default_min_truncate() -> usize {
    20
}
fn default_mask_run() -> usize {
    20
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            min_truncate_chars: default_min_truncate(),
            mask_run_chars: default_mask_run(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.focuslens/config.toml).
    ///
    /// Also checks environment variables:
    /// - `FOCUSLENS_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` (provider key)
    /// - `FOCUSLENS_SEARCH_API_KEY`, `BRAVE_API_KEY` (search key)
    /// - `FOCUSLENS_MODEL` (model override)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("FOCUSLENS_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if self.search.api_key.is_none() {
            self.search.api_key = std::env::var("FOCUSLENS_SEARCH_API_KEY")
                .ok()
                .or_else(|| std::env::var("BRAVE_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("FOCUSLENS_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".focuslens")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            ("search.related_threshold", self.search.related_threshold),
            ("knowledge.high_confidence", self.knowledge.high_confidence),
            ("knowledge_acq.adequate_confidence", self.knowledge_acq.adequate_confidence),
            ("knowledge_acq.thin_confidence", self.knowledge_acq.thin_confidence),
            ("knowledge_acq.decay_per_week", self.knowledge_acq.decay_per_week),
            ("knowledge_acq.delete_at_or_below", self.knowledge_acq.delete_at_or_below),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        let intervals = [
            (
                "knowledge",
                self.knowledge.min_interval_secs,
                self.knowledge.max_interval_secs,
            ),
            ("vlm", self.vlm.min_interval_secs, self.vlm.max_interval_secs),
        ];
        for (name, min, max) in intervals {
            if min == 0 || min > max {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.min_interval_secs must be > 0 and <= max_interval_secs"
                )));
            }
        }

        if self.context.budget_chars == 0 {
            return Err(ConfigError::ValidationError(
                "context.budget_chars must be > 0".into(),
            ));
        }

        if self.memory.max_subjects == 0 || self.memory.session_max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "memory caps must be > 0".into(),
            ));
        }

        if self.knowledge_acq.verified_cooldown_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "knowledge_acq.verified_cooldown_multiplier must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
