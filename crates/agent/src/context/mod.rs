//! Context assembly pipeline.
//!
//! [`sections::gather`] reads both stores into prioritized sections,
//! [`ContextAssembler`] packs them into the character budget and masks the
//! result.

pub mod assembler;
pub mod mask;
pub mod sections;

pub use assembler::{AssembledContext, AssemblyMetadata, ContextAssembler, ContextSection};
pub use mask::Masker;
