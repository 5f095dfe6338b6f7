//! Context assembly: priority-budgeted packing of text sections.
//!
//! Sections are emitted in ascending priority order into a fixed character
//! budget:
//!
//! | Outcome | Condition |
//! |---------|-----------|
//! | Included whole | separator + section fit in the remaining budget |
//! | Truncated, emission stops | it doesn't fit, but more than `min_truncate_chars` remain |
//! | Dropped, emission stops | otherwise |
//!
//! Sections are joined by a blank line, and the separator counts against the
//! budget. Lengths are in chars, so truncation never splits a code point.
//! The packed text is masked last; masking never lengthens it.
//!
//! # Determinism
//!
//! Assembly is a pure function of its input sections: identical sections
//! always produce identical output.

use crate::context::mask::Masker;
use focuslens_config::ContextConfig;
use focuslens_core::subject::truncate_chars;
use serde::{Deserialize, Serialize};

const SEPARATOR: &str = "\n\n";

/// One candidate block of context text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub name: String,
    /// Lower is emitted first.
    pub priority: u8,
    pub content: String,
}

impl ContextSection {
    pub fn new(name: impl Into<String>, priority: u8, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            content: content.into(),
        }
    }
}

/// The packed context plus what happened to each section.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub metadata: AssemblyMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Chars in the final, masked text.
    pub total_chars: usize,
    pub budget: usize,
    /// Sections included whole, in emission order.
    pub included: Vec<String>,
    /// The section cut to fit, if any.
    pub truncated: Option<String>,
    /// Sections left out entirely.
    pub dropped: Vec<String>,
}

pub struct ContextAssembler {
    budget: usize,
    min_truncate: usize,
    masker: Masker,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            budget: config.budget_chars,
            min_truncate: config.min_truncate_chars,
            masker: Masker::new(config.mask_run_chars),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn assemble(&self, sections: &[ContextSection]) -> AssembledContext {
        let mut ordered: Vec<&ContextSection> = sections
            .iter()
            .filter(|s| !s.content.trim().is_empty())
            .collect();
        // Stable: equal priorities keep their input order.
        ordered.sort_by_key(|s| s.priority);

        let mut metadata = AssemblyMetadata {
            budget: self.budget,
            ..AssemblyMetadata::default()
        };
        let mut parts: Vec<String> = Vec::new();
        let mut remaining = self.budget;
        let separator_len = SEPARATOR.chars().count();

        for (index, section) in ordered.iter().enumerate() {
            let separator = if parts.is_empty() { 0 } else { separator_len };
            let len = section.content.chars().count();

            if separator + len <= remaining {
                parts.push(section.content.clone());
                remaining -= separator + len;
                metadata.included.push(section.name.clone());
                continue;
            }

            let room = remaining.saturating_sub(separator);
            let rest = if room > self.min_truncate {
                parts.push(truncate_chars(&section.content, room));
                metadata.truncated = Some(section.name.clone());
                index + 1
            } else {
                index
            };
            metadata
                .dropped
                .extend(ordered[rest..].iter().map(|s| s.name.clone()));
            break;
        }

        let text = self.masker.mask(&parts.join(SEPARATOR));
        metadata.total_chars = text.chars().count();
        AssembledContext { text, metadata }
    }
}
