//! Session store: ephemeral key/value facts for the current run.
//!
//! Values are arbitrary JSON. The store is capped; when a write pushes it
//! over the cap, the least recently updated entries are evicted.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One stored value and when it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    /// Write order, breaks `updated_at` ties during eviction
    seq: u64,
}

struct Inner {
    entries: HashMap<String, SessionEntry>,
    next_seq: u64,
}

/// Process-lifetime key/value store.
pub struct SessionStore {
    inner: RwLock<Inner>,
    max_entries: usize,
}

impl SessionStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// Insert or overwrite a value, then enforce the entry cap.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.into(),
            SessionEntry {
                value: value.into(),
                updated_at: Utc::now(),
                seq,
            },
        );
        Self::prune(&mut inner, self.max_entries);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.entries.get(key).map(|e| e.value.clone())
    }

    /// The value as a string, if it is one.
    pub async fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key).await? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub async fn entry(&self, key: &str) -> Option<SessionEntry> {
        self.inner.read().await.entries.get(key).cloned()
    }

    pub async fn has(&self, key: &str) -> bool {
        self.inner.read().await.entries.contains_key(key)
    }

    /// Remove a key. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.entries.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn prune(inner: &mut Inner, max: usize) {
        let excess = inner.entries.len().saturating_sub(max);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(String, DateTime<Utc>, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.updated_at, e.seq))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        for (key, _, _) in by_age.into_iter().take(excess) {
            inner.entries.remove(&key);
        }
        debug!(evicted = excess, "Session store pruned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let store = SessionStore::new(8);
        store.set("vlm.enriched_title", "Editing main.rs").await;
        assert!(store.has("vlm.enriched_title").await);
        assert_eq!(
            store.get_str("vlm.enriched_title").await.as_deref(),
            Some("Editing main.rs")
        );

        assert!(store.delete("vlm.enriched_title").await);
        assert!(!store.delete("vlm.enriched_title").await);
        assert!(store.get("vlm.enriched_title").await.is_none());
    }

    #[tokio::test]
    async fn non_string_values() {
        let store = SessionStore::new(8);
        store.set("memory.today", json!({"Notepad": 12})).await;
        assert!(store.get_str("memory.today").await.is_none());
        assert_eq!(store.get("memory.today").await.unwrap()["Notepad"], 12);
    }

    #[tokio::test]
    async fn evicts_oldest_updated_beyond_cap() {
        let store = SessionStore::new(2);
        store.set("a", 1).await;
        store.set("b", 2).await;
        // Refresh "a" so "b" becomes the oldest
        store.set("a", 3).await;
        store.set("c", 4).await;

        assert_eq!(store.len().await, 2);
        assert!(store.has("a").await);
        assert!(!store.has("b").await);
        assert!(store.has("c").await);
    }
}
