//! # FocusLens Core
//!
//! The FocusLens domain model: subjects and their similarity, the layered
//! knowledge record, cycle tokens, and the capability traits (generative
//! provider, web lookup, snapshot persistence) the other crates implement.
//! No runtime or I/O dependencies live here.

pub mod cycle;
pub mod error;
pub mod layer;
pub mod message;
pub mod provider;
pub mod search;
pub mod session_keys;
pub mod subject;

// Re-export key types at crate root for ergonomics
pub use cycle::{CycleGuard, CycleToken};
pub use error::{ProviderError, SearchError, StoreError};
pub use layer::{
    AcquiredLayer, AcquisitionTask, KnowledgeLayer, KnowledgeSnapshot, Layer, LayerKind,
    MemoryLayer, PersistenceBackend, QueryOptions, QueueLayer, Retrieval, SearchLayer,
    SubjectRecord, TaskStatus, TermsLayer, VlmLayer,
};
pub use message::{ImageRef, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use search::{SearchBackend, SearchHit, SearchOptions};
