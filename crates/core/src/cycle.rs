//! Cycle identity for cooperative cancellation.
//!
//! Each focus-evaluation cycle takes a fresh token. Background work captures
//! the token of the cycle that launched it and checks it before publishing a
//! result; a later cycle supersedes it and the result is discarded.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one focus-evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleToken(u64);

impl CycleToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Hands out cycle tokens and answers "is this still the current cycle".
#[derive(Debug, Default)]
pub struct CycleGuard {
    current: AtomicU64,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new cycle, superseding every earlier token.
    pub fn begin(&self) -> CycleToken {
        CycleToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The token of the cycle in progress.
    pub fn current(&self) -> CycleToken {
        CycleToken(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, token: CycleToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }
}
