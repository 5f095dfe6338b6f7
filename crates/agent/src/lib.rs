//! Per-cycle orchestration for FocusLens.
//!
//! Each focus change runs one cycle through the [`Orchestrator`]:
//!
//! 1. **Invalidate** session facts that belonged to the previous subject
//! 2. **Publish** today's live activity
//! 3. **Enrich** through gated search, and detached summary, vision and
//!    acquisition work
//! 4. **Assemble** a bounded context block from both stores
//!
//! The block is what gets injected ahead of every downstream model call.

pub mod context;
pub mod orchestrator;

pub use context::{AssembledContext, AssemblyMetadata, ContextAssembler, ContextSection, Masker};
pub use orchestrator::Orchestrator;
