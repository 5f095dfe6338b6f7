//! Well-known session store keys shared between components.

/// Live per-subject focus seconds for today (`{subject: seconds}`).
pub const MEMORY_TODAY: &str = "memory.today";

/// Vision-enriched title for the current subject.
pub const VLM_ENRICHED_TITLE: &str = "vlm.enriched_title";

/// Vision keywords for the current subject.
pub const VLM_KEYWORDS: &str = "vlm.keywords";

/// Subject the vision keys above belong to.
pub const VLM_SUBJECT: &str = "vlm.subject";

/// Truncated text of the most recent search.
pub const SEARCH_RESULTS: &str = "search.results";

/// Subject the cached search results belong to.
pub const SEARCH_SUBJECT: &str = "search.subject";
