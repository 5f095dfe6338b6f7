//! Subject normalization, tokenization and token-set similarity.
//!
//! Subjects are exact keys for storage and fuzzy keys for retrieval. The
//! retrieval score is the Jaccard index over token sets:
//! `|A ∩ B| / |A ∪ B|`, 0.0 when either side has no tokens.

use std::collections::BTreeSet;

/// Maximum stored subject length, in chars.
pub const MAX_SUBJECT_CHARS: usize = 160;

/// Separators that split tokens in addition to whitespace. `.`, `_`, `#`
/// and `+` are kept inside tokens so `file.txt` and `c++` survive.
const SEPARATORS: &[char] = &[
    '-', '–', '—', '|', ':', '/', '\\', ',', ';', '(', ')', '[', ']', '{', '}', '<', '>', '"',
    '\'', '*', '·', '•',
];

/// Built-in subjects that never describe meaningful work.
const NOISE_SUBJECTS: &[&str] = &[
    "desktop",
    "program manager",
    "task switching",
    "start",
    "search",
    "new tab",
    "loading",
    "untitled",
    "lock screen",
];

/// Trim, collapse internal whitespace and cap the length.
pub fn normalize_subject(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_SUBJECT_CHARS)
}

/// Lowercased token set of a subject.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over two token sets.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Jaccard similarity of two raw subjects.
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Whether two subjects are close enough to share cached results.
pub fn related(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}

/// Compact form used to merge usage history: ordered tokens with purely
/// numeric tokens dropped.
pub fn compact_subject(subject: &str) -> String {
    let lowered = subject.to_lowercase();
    lowered
        .split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a subject is noise (too short, or on the built-in or extra list).
pub fn is_noise_subject(subject: &str, extra: &[String]) -> bool {
    if subject.trim().chars().count() < 2 {
        return true;
    }
    let compact = compact_subject(subject);
    if compact.is_empty() {
        return true;
    }
    NOISE_SUBJECTS.contains(&compact.as_str())
        || extra.iter().any(|n| compact_subject(n) == compact)
}

/// Truncate to at most `max` chars without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
