//! In-memory persistence backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use focuslens_core::error::StoreError;
use focuslens_core::layer::{KnowledgeSnapshot, PersistenceBackend};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps the last saved snapshot in process memory.
pub struct InMemoryBackend {
    snapshot: Mutex<Option<KnowledgeSnapshot>>,
    saves: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            saves: AtomicUsize::new(0),
        }
    }

    /// Start with a previously saved snapshot.
    pub fn with_snapshot(snapshot: KnowledgeSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last saved snapshot.
    pub fn saved(&self) -> Option<KnowledgeSnapshot> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Option<KnowledgeSnapshot>, StoreError> {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .map_err(|e| StoreError::Storage(format!("snapshot lock poisoned: {e}")))
    }

    async fn save(&self, snapshot: &KnowledgeSnapshot) -> Result<(), StoreError> {
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|e| StoreError::Storage(format!("snapshot lock poisoned: {e}")))?;
        *slot = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focuslens_core::layer::SubjectRecord;

    #[tokio::test]
    async fn empty_backend_loads_none() {
        let backend = InMemoryBackend::new();
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let backend = InMemoryBackend::new();
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("Notepad".into(), SubjectRecord::default());
        backend.save(&snapshot).await.unwrap();

        let loaded = backend.load().await.unwrap().unwrap();
        assert!(loaded.contains_key("Notepad"));
        assert_eq!(backend.save_count(), 1);
    }
}
