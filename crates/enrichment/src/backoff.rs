//! Per-subject exponential backoff and single-flight guards.
//!
//! A subject becomes eligible once its interval has elapsed since its last
//! attempt. Every attempt, successful or not, doubles the interval up to the
//! policy maximum; the first attempt sets it to the minimum. Intervals only
//! shrink through [`BackoffTable::reset`] or [`BackoffTable::seed`].

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Interval bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl BackoffPolicy {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    pub fn clamp(&self, secs: u64) -> u64 {
        secs.clamp(self.min_secs, self.max_secs)
    }

    /// Interval after `attempts` consecutive attempts.
    pub fn after_attempts(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return self.min_secs;
        }
        let factor = 1u64.checked_shl(attempts.saturating_sub(1)).unwrap_or(u64::MAX);
        self.clamp(self.min_secs.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffEntry {
    pub last_attempt: DateTime<Utc>,
    pub interval_secs: u64,
}

/// Backoff state for many subjects, capped by evicting the entry with the
/// oldest attempt.
pub struct BackoffTable {
    entries: Mutex<HashMap<String, BackoffEntry>>,
    capacity: usize,
}

impl BackoffTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, BackoffEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_due(&self, subject: &str, now: DateTime<Utc>) -> bool {
        match self.entries().get(subject) {
            None => true,
            Some(e) => now - e.last_attempt >= Duration::seconds(e.interval_secs as i64),
        }
    }

    pub fn get(&self, subject: &str) -> Option<BackoffEntry> {
        self.entries().get(subject).copied()
    }

    /// Record an attempt at `now` and return the new interval.
    pub fn record_attempt(&self, subject: &str, now: DateTime<Utc>, policy: BackoffPolicy) -> u64 {
        let mut entries = self.entries();
        let interval_secs = match entries.get(subject) {
            None => policy.min_secs,
            Some(e) => policy.clamp(e.interval_secs.saturating_mul(2)).max(e.interval_secs),
        };
        entries.insert(
            subject.to_string(),
            BackoffEntry {
                last_attempt: now,
                interval_secs,
            },
        );
        Self::evict(&mut entries, self.capacity);
        interval_secs
    }

    /// Restore state recovered from persisted layers.
    pub fn seed(&self, subject: &str, last_attempt: DateTime<Utc>, interval_secs: u64) {
        let mut entries = self.entries();
        entries.insert(
            subject.to_string(),
            BackoffEntry {
                last_attempt,
                interval_secs,
            },
        );
        Self::evict(&mut entries, self.capacity);
    }

    /// Forget a subject; its next check is due immediately.
    pub fn reset(&self, subject: &str) -> bool {
        self.entries().remove(subject).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(entries: &mut HashMap<String, BackoffEntry>, capacity: usize) {
        while entries.len() > capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_attempt)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Keys with a generation currently running.
#[derive(Default)]
pub struct SingleFlight {
    active: Mutex<HashSet<String>>,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `key`, or `None` if it is already in flight. The claim is
    /// released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> Option<FlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            owner: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

pub struct FlightGuard {
    owner: Arc<SingleFlight>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.owner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
