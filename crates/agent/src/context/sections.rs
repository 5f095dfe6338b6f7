//! Candidate context sections, gathered from both stores.
//!
//! | Priority | Section | Source |
//! |----------|---------|--------|
//! | 1 | focus | live or cached vision-enriched title |
//! | 2 | today | top subjects by today's focus time |
//! | 3 | history | usage merged by compact subject |
//! | 4 | knowledge | summaries, vision keywords, acquired knowledge |
//! | 5 | search | fresh or cached search results |
//!
//! Gathering only reads; it never mutates either store.

use crate::context::assembler::ContextSection;
use focuslens_config::AppConfig;
use focuslens_core::layer::{Layer, LayerKind, QueryOptions};
use focuslens_core::session_keys::{
    MEMORY_TODAY, SEARCH_RESULTS, SEARCH_SUBJECT, VLM_ENRICHED_TITLE, VLM_SUBJECT,
};
use focuslens_core::subject::{compact_subject, related, similarity, truncate_chars};
use focuslens_memory::{PersistentStore, SessionStore};
use std::collections::BTreeMap;

const TODAY_LIMIT: usize = 5;
const HISTORY_LIMIT: usize = 5;
const FRAGMENTS_PER_LAYER: usize = 3;
const MIN_FRAGMENT_CONFIDENCE: f64 = 0.3;
/// Summaries at or above the high-confidence mark keep up to this much.
const STRONG_FRAGMENT_CHARS: usize = 400;

/// Render seconds as `1h 5m`, `12m` or `40s`.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    match (hours, minutes) {
        (0, 0) => format!("{secs}s"),
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// Gather every non-empty section for `subject`, in priority order.
pub async fn gather(
    session: &SessionStore,
    store: &PersistentStore,
    subject: &str,
    config: &AppConfig,
) -> Vec<ContextSection> {
    let mut sections = Vec::new();
    if let Some(focus) = focus_section(session, store, subject).await {
        sections.push(ContextSection::new("focus", 1, focus));
    }
    if let Some(today) = today_section(session).await {
        sections.push(ContextSection::new("today", 2, today));
    }
    if let Some(history) = history_section(store).await {
        sections.push(ContextSection::new("history", 3, history));
    }
    if let Some(knowledge) = knowledge_section(store, subject, config).await {
        sections.push(ContextSection::new("knowledge", 4, knowledge));
    }
    if let Some(search) = search_section(session, store, subject, config).await {
        sections.push(ContextSection::new("search", 5, search));
    }
    sections
}

async fn focus_section(session: &SessionStore, store: &PersistentStore, subject: &str) -> Option<String> {
    if subject.is_empty() {
        return None;
    }
    let live = match session.get_str(VLM_SUBJECT).await {
        Some(s) if s == subject => session.get_str(VLM_ENRICHED_TITLE).await,
        _ => None,
    };
    let title = match live {
        Some(title) => Some(title),
        None => match store.get(subject, LayerKind::Vlm).await {
            Some(Layer::Vlm(v)) => Some(v.enriched_title),
            _ => None,
        },
    }
    .filter(|t| !t.trim().is_empty());

    Some(match title {
        Some(title) => format!("Current focus: {subject} ({title})"),
        None => format!("Current focus: {subject}"),
    })
}

async fn today_section(session: &SessionStore) -> Option<String> {
    let today: BTreeMap<String, u64> = session
        .get(MEMORY_TODAY)
        .await
        .and_then(|v| serde_json::from_value(v).ok())?;
    let mut ranked: Vec<(String, u64)> = today.into_iter().filter(|(_, secs)| *secs > 0).collect();
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let lines: Vec<String> = ranked
        .into_iter()
        .take(TODAY_LIMIT)
        .map(|(subject, secs)| format!("- {subject}: {}", format_duration(secs)))
        .collect();
    Some(format!("Today's activity:\n{}", lines.join("\n")))
}

struct Usage {
    display: String,
    total_sec: u64,
    day_count: u32,
}

async fn history_section(store: &PersistentStore) -> Option<String> {
    let mut merged: BTreeMap<String, Usage> = BTreeMap::new();
    for (subject, layer) in store.records_with(LayerKind::Memory).await {
        let Layer::Memory(m) = layer else { continue };
        let key = compact_subject(&subject);
        if key.is_empty() {
            continue;
        }
        merged
            .entry(key)
            .and_modify(|u| {
                u.total_sec += m.total_sec;
                u.day_count = u.day_count.max(m.day_count);
            })
            .or_insert(Usage {
                display: subject,
                total_sec: m.total_sec,
                day_count: m.day_count,
            });
    }
    let mut usage: Vec<Usage> = merged.into_values().filter(|u| u.total_sec > 0).collect();
    if usage.is_empty() {
        return None;
    }
    usage.sort_by(|a, b| b.total_sec.cmp(&a.total_sec).then_with(|| a.display.cmp(&b.display)));

    let lines: Vec<String> = usage
        .into_iter()
        .take(HISTORY_LIMIT)
        .map(|u| {
            let days = if u.day_count == 1 { "day" } else { "days" };
            format!(
                "- {}: {} over {} {days}",
                u.display,
                format_duration(u.total_sec),
                u.day_count
            )
        })
        .collect();
    Some(format!("Usage history:\n{}", lines.join("\n")))
}

async fn knowledge_section(store: &PersistentStore, subject: &str, config: &AppConfig) -> Option<String> {
    if subject.is_empty() {
        return None;
    }
    let high = config.knowledge.high_confidence;
    let summary_chars = config.knowledge.max_summary_chars;
    let options = |kind| {
        QueryOptions::layer(kind)
            .max_results(FRAGMENTS_PER_LAYER)
            .min_confidence(MIN_FRAGMENT_CONFIDENCE)
    };

    let mut fragments: Vec<(f64, String)> = Vec::new();
    for hit in store.query(subject, &options(LayerKind::Knowledge).enrich_with_vlm()).await {
        if let Layer::Knowledge(k) = hit.data {
            let limit = if hit.confidence >= high {
                STRONG_FRAGMENT_CHARS
            } else {
                summary_chars
            };
            fragments.push((hit.confidence, format!("- {}: {}", hit.subject, truncate_chars(&k.summary, limit))));
        }
    }
    for hit in store.query(subject, &options(LayerKind::Vlm)).await {
        if let Layer::Vlm(v) = hit.data {
            if !v.summary.trim().is_empty() {
                fragments.push((hit.confidence, format!("- {} (seen): {}", hit.subject, v.summary)));
            }
        }
    }
    for (confidence, line) in acquired_fragments(store, subject).await {
        fragments.push((confidence, line));
    }
    if fragments.is_empty() {
        return None;
    }
    fragments.sort_by(|a, b| b.0.total_cmp(&a.0));

    let lines: Vec<String> = fragments.into_iter().map(|(_, line)| line).collect();
    Some(format!("Background knowledge:\n{}", lines.join("\n")))
}

/// Acquired knowledge is keyed by search term, so it reaches a subject two
/// ways: a term that resembles the subject directly, or a topic whose
/// recorded sources resemble it. Weighted by how much the acquired text is
/// still trusted; one line per term.
async fn acquired_fragments(store: &PersistentStore, subject: &str) -> Vec<(f64, String)> {
    let mut linked: BTreeMap<String, f64> = BTreeMap::new();
    for (topic, layer) in store.records_with(LayerKind::Terms).await {
        let Layer::Terms(t) = layer else { continue };
        let link = t
            .sources
            .iter()
            .map(|source| similarity(subject, source))
            .fold(0.0, f64::max);
        if link >= MIN_FRAGMENT_CONFIDENCE {
            linked.insert(topic, link);
        }
    }

    let mut by_term: BTreeMap<String, (f64, String)> = BTreeMap::new();
    let mut offer = |term: String, confidence: f64, line: String| {
        if confidence <= 0.0 {
            return;
        }
        let entry = by_term.entry(term).or_insert((confidence, line.clone()));
        if confidence > entry.0 {
            *entry = (confidence, line);
        }
    };

    let direct = QueryOptions::layer(LayerKind::Acquired)
        .max_results(FRAGMENTS_PER_LAYER)
        .min_confidence(MIN_FRAGMENT_CONFIDENCE);
    for hit in store.query(subject, &direct).await {
        if let Layer::Acquired(a) = hit.data {
            let line = format!("- {} ({}): {}", a.term, a.topic, a.summary);
            offer(a.term, hit.confidence * a.confidence, line);
        }
    }
    if !linked.is_empty() {
        for (_, layer) in store.records_with(LayerKind::Acquired).await {
            let Layer::Acquired(a) = layer else { continue };
            let Some(link) = linked.get(&a.topic) else { continue };
            let line = format!("- {} ({}): {}", a.term, a.topic, a.summary);
            offer(a.term, link * a.confidence, line);
        }
    }

    let mut fragments: Vec<(f64, String)> = by_term.into_values().collect();
    fragments.sort_by(|a, b| b.0.total_cmp(&a.0));
    fragments.truncate(FRAGMENTS_PER_LAYER);
    fragments
}

async fn search_section(
    session: &SessionStore,
    store: &PersistentStore,
    subject: &str,
    config: &AppConfig,
) -> Option<String> {
    if subject.is_empty() {
        return None;
    }
    let live = match session.get_str(SEARCH_SUBJECT).await {
        Some(searched) if related(&searched, subject, config.search.related_threshold) => {
            session.get_str(SEARCH_RESULTS).await
        }
        _ => None,
    };
    let results = match live {
        Some(results) => Some(results),
        None => match store.get(subject, LayerKind::Search).await {
            Some(Layer::Search(s)) => Some(s.results),
            _ => None,
        },
    }
    .filter(|r| !r.trim().is_empty())?;
    Some(format!("Search results:\n{results}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use focuslens_core::layer::{
        AcquiredLayer, KnowledgeLayer, MemoryLayer, SearchLayer, TermsLayer, VlmLayer,
    };
    use focuslens_memory::InMemoryBackend;
    use std::sync::Arc;

    fn stores() -> (SessionStore, PersistentStore) {
        (
            SessionStore::new(64),
            PersistentStore::new(Arc::new(InMemoryBackend::new()), 100),
        )
    }

    fn memory(total_sec: u64, day_count: u32) -> Layer {
        Layer::Memory(MemoryLayer {
            total_sec,
            last_seen: Utc::now(),
            day_count,
            recent_days: BTreeMap::new(),
        })
    }

    fn names(sections: &[ContextSection]) -> Vec<&str> {
        sections.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(12), "12s");
        assert_eq!(format_duration(125), "2m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3900), "1h 5m");
    }

    #[tokio::test]
    async fn empty_stores_yield_only_focus() {
        let (session, store) = stores();
        let sections = gather(&session, &store, "Notepad", &AppConfig::default()).await;
        assert_eq!(names(&sections), vec!["focus"]);
        assert_eq!(sections[0].content, "Current focus: Notepad");
    }

    #[tokio::test]
    async fn live_title_only_for_matching_subject() {
        let (session, store) = stores();
        session.set(VLM_SUBJECT, "Terminal").await;
        session.set(VLM_ENRICHED_TITLE, "Running cargo tests").await;
        let sections = gather(&session, &store, "Notepad", &AppConfig::default()).await;
        assert_eq!(sections[0].content, "Current focus: Notepad");

        let sections = gather(&session, &store, "Terminal", &AppConfig::default()).await;
        assert_eq!(sections[0].content, "Current focus: Terminal (Running cargo tests)");
    }

    #[tokio::test]
    async fn cached_title_from_vlm_layer() {
        let (session, store) = stores();
        store
            .set(
                "Terminal",
                Layer::Vlm(VlmLayer {
                    summary: "cargo, tests".into(),
                    enriched_title: "Rust test run".into(),
                    last_updated: Utc::now(),
                    update_count: 1,
                }),
            )
            .await;
        let sections = gather(&session, &store, "Terminal", &AppConfig::default()).await;
        assert_eq!(sections[0].content, "Current focus: Terminal (Rust test run)");
        assert!(names(&sections).contains(&"knowledge"));
    }

    #[tokio::test]
    async fn today_keeps_top_five() {
        let (session, store) = stores();
        let today: BTreeMap<String, u64> = (1..=7).map(|i| (format!("App {i}"), i * 10)).collect();
        session
            .set(MEMORY_TODAY, serde_json::to_value(today).unwrap())
            .await;
        let sections = gather(&session, &store, "", &AppConfig::default()).await;
        assert_eq!(names(&sections), vec!["today"]);
        let lines: Vec<&str> = sections[0].content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "- App 7: 1m");
        assert_eq!(lines[5], "- App 3: 30s");
    }

    #[tokio::test]
    async fn history_merges_compact_subjects() {
        let (session, store) = stores();
        store.set("Chat (3)", memory(120, 2)).await;
        store.set("chat 4", memory(60, 5)).await;
        store.set("Terminal", memory(30, 1)).await;

        let sections = gather(&session, &store, "", &AppConfig::default()).await;
        let history = &sections[0].content;
        assert_eq!(
            history,
            "Usage history:\n- Chat (3): 3m over 5 days\n- Terminal: 30s over 1 day"
        );
    }

    #[tokio::test]
    async fn knowledge_fragments_sorted_by_confidence() {
        let (session, store) = stores();
        let now = Utc::now();
        store
            .set(
                "Notepad - notes.txt",
                Layer::Knowledge(KnowledgeLayer {
                    summary: "A plain text editor".into(),
                    last_updated: now,
                    update_count: 1,
                    current_interval: 300,
                }),
            )
            .await;
        store
            .set(
                "notepad tips",
                Layer::Acquired(AcquiredLayer {
                    summary: "Keyboard shortcuts for Notepad".into(),
                    topic: "Text editors".into(),
                    term: "notepad tips".into(),
                    confidence: 0.8,
                    original_confidence: 0.8,
                    searched_at: now,
                }),
            )
            .await;

        let sections = gather(&session, &store, "Notepad - notes.txt", &AppConfig::default()).await;
        let knowledge = sections.iter().find(|s| s.name == "knowledge").unwrap();
        let lines: Vec<&str> = knowledge.content.lines().collect();
        assert_eq!(lines[1], "- Notepad - notes.txt: A plain text editor");
        assert_eq!(lines[2], "- notepad tips (Text editors): Keyboard shortcuts for Notepad");
    }

    fn acquired(term: &str, topic: &str, summary: &str, confidence: f64) -> Layer {
        Layer::Acquired(AcquiredLayer {
            summary: summary.into(),
            topic: topic.into(),
            term: term.into(),
            confidence,
            original_confidence: confidence,
            searched_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn acquired_knowledge_reaches_subject_through_topic_sources() {
        let (session, store) = stores();
        store
            .set(
                "Query planning",
                Layer::Terms(TermsLayer {
                    terms: vec!["postgres explain analyze".into(), "postgres index types".into()],
                    generated_at: Utc::now(),
                    lang: "en".into(),
                    verified: false,
                    sources: vec!["psql - orders".into()],
                }),
            )
            .await;
        store
            .set(
                "postgres explain analyze",
                acquired("postgres explain analyze", "Query planning", "Reading plan output", 0.9),
            )
            .await;
        store
            .set(
                "postgres index types",
                acquired("postgres index types", "Query planning", "B-tree and GIN", 0.6),
            )
            .await;
        store
            .set("gardening tips", acquired("gardening tips", "Plants", "Water weekly", 0.9))
            .await;

        let config = AppConfig::default();
        let sections = gather(&session, &store, "psql - orders", &config).await;
        let knowledge = sections.iter().find(|s| s.name == "knowledge").unwrap();
        let lines: Vec<&str> = knowledge.content.lines().collect();
        assert_eq!(
            lines[1..],
            [
                "- postgres explain analyze (Query planning): Reading plan output",
                "- postgres index types (Query planning): B-tree and GIN",
            ]
        );

        // An unrelated window sees none of it.
        let sections = gather(&session, &store, "Spreadsheet - budget", &config).await;
        assert!(!names(&sections).contains(&"knowledge"));
    }

    #[tokio::test]
    async fn search_prefers_related_live_results() {
        let (session, store) = stores();
        session.set(SEARCH_SUBJECT, "Rust book - chapter 4").await;
        session.set(SEARCH_RESULTS, "Ownership: rules").await;
        store
            .set(
                "Spreadsheet",
                Layer::Search(SearchLayer {
                    results: "Cached sheet results".into(),
                    cached_at: Utc::now(),
                }),
            )
            .await;

        let config = AppConfig::default();
        let sections = gather(&session, &store, "Rust book - chapter 5", &config).await;
        let search = sections.iter().find(|s| s.name == "search").unwrap();
        assert_eq!(search.content, "Search results:\nOwnership: rules");

        let sections = gather(&session, &store, "Spreadsheet", &config).await;
        let search = sections.iter().find(|s| s.name == "search").unwrap();
        assert_eq!(search.content, "Search results:\nCached sheet results");
    }
}
