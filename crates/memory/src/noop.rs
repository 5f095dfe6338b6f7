//! No-op persistence backend: knowledge lives only for the process lifetime.

use async_trait::async_trait;
use focuslens_core::error::StoreError;
use focuslens_core::layer::{KnowledgeSnapshot, PersistenceBackend};

/// A backend that never loads anything and discards every save.
pub struct NoopBackend;

#[async_trait]
impl PersistenceBackend for NoopBackend {
    fn name(&self) -> &str {
        "none"
    }

    async fn load(&self) -> Result<Option<KnowledgeSnapshot>, StoreError> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &KnowledgeSnapshot) -> Result<(), StoreError> {
        Ok(())
    }
}
