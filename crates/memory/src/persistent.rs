//! Persistent store: the durable per-subject, multi-layer knowledge base.
//!
//! Records live in memory and are written through a [`PersistenceBackend`]
//! only on [`PersistentStore::flush`], and only when something changed.
//! Every mutation replaces a whole layer payload under one write lock, so a
//! reader never observes a half-updated record.

use chrono::{DateTime, Utc};
use focuslens_core::error::StoreError;
use focuslens_core::layer::{
    KnowledgeSnapshot, Layer, LayerKind, PersistenceBackend, QueryOptions, RESERVED_PREFIX,
    Retrieval, SubjectRecord,
};
use focuslens_core::subject::normalize_subject;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::retrieval;

/// Summary counts for status reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    /// Non-reserved subjects
    pub subjects: usize,
    pub layers: BTreeMap<LayerKind, usize>,
    /// Tasks currently in the acquisition queue
    pub queued_tasks: usize,
    pub dirty: bool,
}

/// Clears the in-progress flag when a flush ends, however it ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PersistentStore {
    records: RwLock<KnowledgeSnapshot>,
    backend: Arc<dyn PersistenceBackend>,
    dirty: AtomicBool,
    flushing: AtomicBool,
    max_subjects: usize,
}

impl PersistentStore {
    /// An empty store writing through `backend`.
    pub fn new(backend: Arc<dyn PersistenceBackend>, max_subjects: usize) -> Self {
        Self::with_records(backend, max_subjects, KnowledgeSnapshot::new())
    }

    fn with_records(
        backend: Arc<dyn PersistenceBackend>,
        max_subjects: usize,
        records: KnowledgeSnapshot,
    ) -> Self {
        Self {
            records: RwLock::new(records),
            backend,
            dirty: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            max_subjects: max_subjects.max(1),
        }
    }

    /// Load the last snapshot from `backend`.
    ///
    /// Missing data starts an empty store. A load failure is logged and also
    /// starts empty; the process keeps serving from memory.
    pub async fn load(backend: Arc<dyn PersistenceBackend>, max_subjects: usize) -> Self {
        let records = match backend.load().await {
            Ok(Some(mut snapshot)) => {
                snapshot.retain(|_, record| !record.is_empty());
                info!(
                    backend = backend.name(),
                    subjects = snapshot.len(),
                    "Knowledge store loaded"
                );
                snapshot
            }
            Ok(None) => {
                debug!(backend = backend.name(), "No prior knowledge, starting empty");
                KnowledgeSnapshot::new()
            }
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Failed to load knowledge, starting empty");
                KnowledgeSnapshot::new()
            }
        };
        Self::with_records(backend, max_subjects, records)
    }

    fn key(subject: &str) -> String {
        normalize_subject(subject)
    }

    pub async fn get(&self, subject: &str, kind: LayerKind) -> Option<Layer> {
        self.records
            .read()
            .await
            .get(&Self::key(subject))
            .and_then(|r| r.get(kind))
    }

    pub async fn record(&self, subject: &str) -> Option<SubjectRecord> {
        self.records.read().await.get(&Self::key(subject)).cloned()
    }

    pub async fn has(&self, subject: &str, kind: LayerKind) -> bool {
        self.records
            .read()
            .await
            .get(&Self::key(subject))
            .is_some_and(|r| r.has(kind))
    }

    /// Replace one layer. An empty payload removes the layer instead, and a
    /// record left with no layers is deleted.
    pub async fn set(&self, subject: &str, layer: Layer) {
        let kind = layer.kind();
        self.update(subject, kind, |_| Some(layer)).await;
    }

    /// Remove one layer. Returns whether it was present.
    pub async fn remove(&self, subject: &str, kind: LayerKind) -> bool {
        let key = Self::key(subject);
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&key) else {
            return false;
        };
        let removed = record.remove(kind);
        if record.is_empty() {
            records.remove(&key);
        }
        if removed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Read-modify-write of one layer under a single write lock.
    ///
    /// `f` receives the current payload and returns the replacement; `None`
    /// or an empty payload removes the layer.
    pub async fn update<F>(&self, subject: &str, kind: LayerKind, f: F)
    where
        F: FnOnce(Option<Layer>) -> Option<Layer>,
    {
        let key = Self::key(subject);
        if key.is_empty() {
            return;
        }
        let mut records = self.records.write().await;
        let current = records.get(&key).and_then(|r| r.get(kind));
        let had_layer = current.is_some();

        match f(current) {
            Some(layer) if !layer.is_empty() => {
                records.entry(key).or_default().put(layer);
                self.dirty.store(true, Ordering::SeqCst);
            }
            _ => {
                if had_layer {
                    if let Some(record) = records.get_mut(&key) {
                        record.remove(kind);
                        if record.is_empty() {
                            records.remove(&key);
                        }
                    }
                    self.dirty.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Fuzzy retrieval against one layer.
    pub async fn query(&self, subject: &str, options: &QueryOptions) -> Vec<Retrieval> {
        retrieval::rank(&*self.records.read().await, subject, options)
    }

    /// Every stored payload of one layer kind, in key order.
    pub async fn records_with(&self, kind: LayerKind) -> Vec<(String, Layer)> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|(key, record)| record.get(kind).map(|l| (key.clone(), l)))
            .collect()
    }

    pub async fn subjects(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> KnowledgeSnapshot {
        self.records.read().await.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Prune to the subject cap and save through the backend.
    ///
    /// Returns `Ok(false)` when there was nothing to write or another flush
    /// was already running (the request is dropped, not queued; the store
    /// stays dirty for the next attempt). A failed save re-marks the store
    /// dirty.
    pub async fn flush(&self) -> Result<bool, StoreError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Flush already in progress, request dropped");
            return Ok(false);
        }
        let _guard = FlushGuard(&self.flushing);

        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = {
            let mut records = self.records.write().await;
            Self::prune(&mut records, self.max_subjects);
            records.clone()
        };

        match self.backend.save(&snapshot).await {
            Ok(()) => {
                debug!(subjects = snapshot.len(), backend = self.backend.name(), "Knowledge flushed");
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Drop the least recently seen subjects until at most `cap` remain.
    /// Subjects without a memory layer count as oldest; reserved keys are
    /// exempt and do not count toward the cap.
    fn prune(records: &mut KnowledgeSnapshot, cap: usize) {
        let mut candidates: Vec<(Option<DateTime<Utc>>, String)> = records
            .iter()
            .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
            .map(|(key, record)| (record.memory.as_ref().map(|m| m.last_seen), key.clone()))
            .collect();
        let excess = candidates.len().saturating_sub(cap);
        if excess == 0 {
            return;
        }
        // None < Some(_), so subjects without usage go first.
        candidates.sort();
        for (_, key) in candidates.into_iter().take(excess) {
            records.remove(&key);
        }
        info!(pruned = excess, cap, "Knowledge store pruned to cap");
    }

    /// Remove subjects whose `memory.last_seen` is before `cutoff`.
    pub async fn prune_stale(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|key, record| {
            key.starts_with(RESERVED_PREFIX)
                || record.memory.as_ref().is_none_or(|m| m.last_seen >= cutoff)
        });
        let removed = before - records.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            info!(removed, "Pruned subjects past retention");
        }
        removed
    }

    pub async fn stats(&self) -> StoreStats {
        let records = self.records.read().await;
        let mut stats = StoreStats {
            dirty: self.is_dirty(),
            ..StoreStats::default()
        };
        for (key, record) in records.iter() {
            if !key.starts_with(RESERVED_PREFIX) {
                stats.subjects += 1;
            }
            for kind in LayerKind::ALL {
                if record.has(kind) {
                    *stats.layers.entry(kind).or_default() += 1;
                }
            }
            if let Some(queue) = &record.queue {
                stats.queued_tasks += queue.tasks.len();
            }
        }
        stats
    }
}
