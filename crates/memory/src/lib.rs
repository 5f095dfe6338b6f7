//! Two-tier memory for FocusLens: an ephemeral session store and a durable,
//! multi-layer persistent store, plus the activity tracker that feeds it.

pub mod activity;
pub mod file_backend;
pub mod in_memory;
pub mod noop;
pub mod persistent;
pub mod retrieval;
pub mod session;

pub use activity::ActivityTracker;
pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;
pub use noop::NoopBackend;
pub use persistent::{PersistentStore, StoreStats};
pub use session::{SessionEntry, SessionStore};
