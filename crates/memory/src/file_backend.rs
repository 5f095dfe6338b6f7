//! File-based persistence backend: the whole snapshot as one JSON document.
//!
//! Storage location: `~/.focuslens/knowledge.json` unless configured.
//!
//! Saves write a sibling temp file and rename it over the target, so a crash
//! mid-write leaves the previous snapshot intact.

use async_trait::async_trait;
use focuslens_core::error::StoreError;
use focuslens_core::layer::{KnowledgeSnapshot, PersistenceBackend};
use std::path::PathBuf;
use tracing::debug;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Option<KnowledgeSnapshot>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let snapshot: KnowledgeSnapshot = serde_json::from_str(&content).map_err(|e| {
            StoreError::Serialization(format!("Corrupted knowledge file {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), subjects = snapshot.len(), "Knowledge file read");
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &KnowledgeSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create knowledge directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize knowledge: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| StoreError::Storage(format!("Failed to write knowledge file: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Storage(format!("Failed to replace knowledge file: {e}")))?;
        Ok(())
    }
}
