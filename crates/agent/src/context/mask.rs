//! Credential-like token masking.
//!
//! Window titles and captured text sometimes carry API keys, session ids or
//! tokens. Any unbroken ASCII alphanumeric run of at least `min_run` chars is
//! replaced by its first four chars followed by `****`, which never makes the
//! text longer.

use regex_lite::{Captures, Regex};
use tracing::warn;

const KEEP_CHARS: usize = 4;
const MASK: &str = "****";

pub struct Masker {
    pattern: Option<Regex>,
}

impl Masker {
    pub fn new(min_run: usize) -> Self {
        // Anything shorter than the kept prefix plus the mask would grow.
        let min_run = min_run.max(KEEP_CHARS + MASK.len());
        let pattern = match Regex::new(&format!("[A-Za-z0-9]{{{min_run},}}")) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "Mask pattern rejected, masking disabled");
                None
            }
        };
        Self { pattern }
    }

    pub fn mask(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re
                .replace_all(text, |caps: &Captures<'_>| {
                    format!("{}{MASK}", &caps[0][..KEEP_CHARS])
                })
                .into_owned(),
            None => text.to_string(),
        }
    }
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(20)
    }
}
