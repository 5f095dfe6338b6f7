//! Activity tracker: per-subject focus time.
//!
//! Ticks accumulate in an in-memory counter map. A flush swaps that map for
//! an empty one under a short lock (ticks arriving during the merge land in
//! the new map), merges the swapped counts into each subject's memory layer,
//! republishes today's live view to the session store and prunes subjects
//! past retention.

use chrono::{DateTime, Duration, Local, Utc};
use focuslens_config::MemoryConfig;
use focuslens_core::layer::{Layer, LayerKind, MemoryLayer};
use focuslens_core::session_keys::MEMORY_TODAY;
use focuslens_core::subject::normalize_subject;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::persistent::PersistentStore;
use crate::session::SessionStore;

/// Local calendar day key (`YYYY-MM-DD`) for a timestamp.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

pub struct ActivityTracker {
    pending: Mutex<HashMap<String, u64>>,
    store: Arc<PersistentStore>,
    session: Arc<SessionStore>,
    config: RwLock<MemoryConfig>,
}

impl ActivityTracker {
    pub fn new(store: Arc<PersistentStore>, session: Arc<SessionStore>, config: MemoryConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            store,
            session,
            config: RwLock::new(config),
        }
    }

    /// Swap retention and bucket settings; applies from the next flush.
    pub fn configure(&self, config: MemoryConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    fn config(&self) -> MemoryConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // The map holds plain counters; a poisoned lock is still consistent.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one second of focus on `subject`.
    pub fn tick(&self, subject: &str) {
        self.tick_secs(subject, 1);
    }

    pub fn tick_secs(&self, subject: &str, secs: u64) {
        let subject = normalize_subject(subject);
        if subject.is_empty() || secs == 0 {
            return;
        }
        *self.pending().entry(subject).or_default() += secs;
    }

    /// Total tracked focus on `subject`: persisted plus not yet flushed.
    pub async fn focus_secs(&self, subject: &str) -> u64 {
        let subject = normalize_subject(subject);
        let unflushed = self.pending().get(&subject).copied().unwrap_or(0);
        let persisted = match self.store.get(&subject, LayerKind::Memory).await {
            Some(Layer::Memory(m)) => m.total_sec,
            _ => 0,
        };
        persisted + unflushed
    }

    /// Today's seconds per subject: the persisted bucket for today plus
    /// unflushed ticks.
    pub async fn live_today(&self) -> BTreeMap<String, u64> {
        self.live_today_at(Utc::now()).await
    }

    async fn live_today_at(&self, now: DateTime<Utc>) -> BTreeMap<String, u64> {
        let today = day_key(now);
        let mut view: BTreeMap<String, u64> = self
            .store
            .records_with(LayerKind::Memory)
            .await
            .into_iter()
            .filter_map(|(subject, layer)| match layer {
                Layer::Memory(m) => m.recent_days.get(&today).map(|secs| (subject, *secs)),
                _ => None,
            })
            .collect();
        let unflushed: Vec<(String, u64)> =
            self.pending().iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (subject, secs) in unflushed {
            *view.entry(subject).or_default() += secs;
        }
        view
    }

    /// Write today's live view to the session store.
    pub async fn publish(&self) {
        let view = self.live_today().await;
        self.session
            .set(MEMORY_TODAY, serde_json::to_value(view).unwrap_or_default())
            .await;
    }

    pub async fn flush(&self) -> usize {
        self.flush_at(Utc::now()).await
    }

    /// Merge unflushed ticks into the persistent memory layers as of `now`.
    /// Returns the number of subjects merged.
    pub async fn flush_at(&self, now: DateTime<Utc>) -> usize {
        let batch = std::mem::take(&mut *self.pending());
        let merged = batch.len();
        let today = day_key(now);
        let config = self.config();
        let keep_days = config.recent_days.max(1);

        for (subject, secs) in batch {
            let today = today.clone();
            self.store
                .update(&subject, LayerKind::Memory, move |current| {
                    let mut layer = match current {
                        Some(Layer::Memory(m)) => m,
                        _ => MemoryLayer {
                            total_sec: 0,
                            last_seen: now,
                            day_count: 0,
                            recent_days: BTreeMap::new(),
                        },
                    };
                    if !layer.recent_days.contains_key(&today) {
                        layer.day_count += 1;
                    }
                    layer.total_sec += secs;
                    layer.last_seen = now;
                    *layer.recent_days.entry(today).or_default() += secs;
                    // Keys sort chronologically.
                    while layer.recent_days.len() > keep_days {
                        layer.recent_days.pop_first();
                    }
                    Some(Layer::Memory(layer))
                })
                .await;
        }

        if merged > 0 {
            debug!(subjects = merged, "Activity merged into memory layers");
        }

        let view = self.live_today_at(now).await;
        self.session
            .set(MEMORY_TODAY, serde_json::to_value(view).unwrap_or_default())
            .await;

        let retention = Duration::days(config.retention_days as i64);
        self.store.prune_stale(now - retention).await;
        merged
    }

    /// Flush on the configured period until the handle is aborted.
    pub fn spawn_flush_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config().flush_interval_secs.max(1));
        info!(period_secs = period.as_secs(), "Activity flush loop started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.flush().await;
                if let Err(e) = self.store.flush().await {
                    tracing::warn!(error = %e, "Periodic knowledge flush failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBackend;
    use chrono::TimeZone;

    fn local_noon(month: u32, day: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, month, day, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn tracker() -> (Arc<PersistentStore>, Arc<SessionStore>, ActivityTracker) {
        let store = Arc::new(PersistentStore::new(Arc::new(InMemoryBackend::new()), 100));
        let session = Arc::new(SessionStore::new(64));
        let tracker = ActivityTracker::new(store.clone(), session.clone(), MemoryConfig::default());
        (store, session, tracker)
    }

    fn memory(layer: Option<Layer>) -> MemoryLayer {
        match layer {
            Some(Layer::Memory(m)) => m,
            other => panic!("expected memory layer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ticks_publish_and_flush() {
        let (store, session, tracker) = tracker();
        for _ in 0..12 {
            tracker.tick("Notepad");
        }

        tracker.publish().await;
        let today = session.get(MEMORY_TODAY).await.unwrap();
        assert_eq!(today["Notepad"], 12);

        let now = Utc::now();
        assert_eq!(tracker.flush_at(now).await, 1);
        let layer = memory(store.get("Notepad", LayerKind::Memory).await);
        assert!(layer.total_sec >= 12);
        assert_eq!(layer.recent_days.get(&day_key(now)), Some(&12));
        assert_eq!(layer.day_count, 1);

        // Live view still counts flushed seconds.
        let today = session.get(MEMORY_TODAY).await.unwrap();
        assert_eq!(today["Notepad"], 12);
    }

    #[tokio::test]
    async fn day_count_increments_only_on_new_day() {
        let (store, _, tracker) = tracker();
        let day1 = local_noon(3, 10);

        tracker.tick_secs("Terminal", 30);
        tracker.flush_at(day1).await;
        tracker.tick_secs("Terminal", 30);
        tracker.flush_at(day1 + Duration::minutes(5)).await;
        assert_eq!(memory(store.get("Terminal", LayerKind::Memory).await).day_count, 1);

        tracker.tick_secs("Terminal", 10);
        tracker.flush_at(day1 + Duration::days(1)).await;
        let layer = memory(store.get("Terminal", LayerKind::Memory).await);
        assert_eq!(layer.day_count, 2);
        assert_eq!(layer.total_sec, 70);
    }

    #[tokio::test]
    async fn keeps_only_recent_day_buckets() {
        let (store, _, tracker) = tracker();
        let start = local_noon(5, 1);
        for day in 0..10 {
            tracker.tick("Browser");
            tracker.flush_at(start + Duration::days(day)).await;
        }
        let layer = memory(store.get("Browser", LayerKind::Memory).await);
        assert_eq!(layer.recent_days.len(), 7);
        assert!(layer.recent_days.contains_key(&day_key(start + Duration::days(9))));
        assert!(!layer.recent_days.contains_key(&day_key(start)));
        assert_eq!(layer.day_count, 10);
    }

    #[tokio::test]
    async fn flush_prunes_subjects_past_retention() {
        let (store, _, tracker) = tracker();
        let long_ago = Utc::now() - Duration::days(200);
        tracker.tick("Old App");
        tracker.flush_at(long_ago).await;
        assert!(store.record("Old App").await.is_some());

        tracker.tick("New App");
        tracker.flush_at(Utc::now()).await;
        assert!(store.record("Old App").await.is_none());
        assert!(store.record("New App").await.is_some());
    }

    #[tokio::test]
    async fn focus_secs_combines_persisted_and_pending() {
        let (_, _, tracker) = tracker();
        tracker.tick_secs("Editor", 40);
        tracker.flush().await;
        tracker.tick_secs("Editor", 5);
        assert_eq!(tracker.focus_secs("Editor").await, 45);
        assert_eq!(tracker.focus_secs("Unknown").await, 0);
    }

    #[tokio::test]
    async fn blank_subjects_are_ignored() {
        let (_, _, tracker) = tracker();
        tracker.tick("   ");
        assert_eq!(tracker.flush().await, 0);
    }
}
