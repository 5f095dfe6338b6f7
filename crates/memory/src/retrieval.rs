//! Token-set retrieval over the persistent snapshot.
//!
//! A stored subject matches a query subject by Jaccard similarity of their
//! token sets. With `enrich_with_vlm`, the stored side is widened with the
//! subject's vision keywords so a terse window title can still match a
//! descriptive query. Retrieval never mutates the snapshot.

use focuslens_core::layer::{KnowledgeSnapshot, QueryOptions, RESERVED_PREFIX, Retrieval};
use focuslens_core::subject::{jaccard, tokenize};

/// Rank every record holding `options.layer` against `subject`.
///
/// Results are sorted by descending confidence; equal scores keep the
/// snapshot's key order. Zero-overlap records never match.
pub fn rank(snapshot: &KnowledgeSnapshot, subject: &str, options: &QueryOptions) -> Vec<Retrieval> {
    let query = tokenize(subject);
    if query.is_empty() || options.max_results == 0 {
        return Vec::new();
    }

    let mut hits: Vec<Retrieval> = snapshot
        .iter()
        .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
        .filter_map(|(key, record)| {
            let data = record.get(options.layer)?;
            let mut tokens = tokenize(key);
            if options.enrich_with_vlm {
                if let Some(vlm) = &record.vlm {
                    tokens.extend(tokenize(&vlm.summary));
                }
            }
            let confidence = jaccard(&query, &tokens);
            (confidence > 0.0 && confidence >= options.min_confidence).then(|| Retrieval {
                subject: key.clone(),
                confidence,
                data,
            })
        })
        .collect();

    // `sort_by` is stable, so ties keep iteration order.
    hits.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(options.max_results);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use focuslens_core::layer::{
        KnowledgeLayer, Layer, LayerKind, MemoryLayer, SubjectRecord, VlmLayer,
    };
    use std::collections::BTreeMap;

    fn memory_record() -> SubjectRecord {
        let mut record = SubjectRecord::default();
        record.put(Layer::Memory(MemoryLayer {
            total_sec: 30,
            last_seen: Utc::now(),
            day_count: 1,
            recent_days: BTreeMap::new(),
        }));
        record
    }

    fn knowledge_record(summary: &str) -> SubjectRecord {
        let mut record = SubjectRecord::default();
        record.put(Layer::Knowledge(KnowledgeLayer {
            summary: summary.into(),
            last_updated: Utc::now(),
            update_count: 1,
            current_interval: 300,
        }));
        record
    }

    #[test]
    fn matches_window_title_against_stored_subject() {
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("notepad untitled".into(), memory_record());

        let hits = rank(
            &snapshot,
            "Notepad - file.txt",
            &QueryOptions::layer(LayerKind::Memory).min_confidence(0.3),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "notepad untitled");
        assert!((hits[0].confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn only_records_with_the_layer_match() {
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("rust book".into(), memory_record());
        let hits = rank(&snapshot, "rust book", &QueryOptions::layer(LayerKind::Knowledge));
        assert!(hits.is_empty());
    }

    #[test]
    fn sorted_descending_and_truncated() {
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("rust".into(), knowledge_record("a"));
        snapshot.insert("rust book".into(), knowledge_record("b"));
        snapshot.insert("rust book online".into(), knowledge_record("c"));

        let hits = rank(
            &snapshot,
            "rust book online",
            &QueryOptions::layer(LayerKind::Knowledge).max_results(2),
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].subject, "rust book online");
        assert_eq!(hits[1].subject, "rust book");
        assert!(hits[0].confidence >= hits[1].confidence);
    }

    #[test]
    fn vlm_keywords_widen_the_stored_side() {
        let mut record = knowledge_record("Terminal emulator");
        record.put(Layer::Vlm(VlmLayer {
            summary: "cargo build errors".into(),
            enriched_title: "Fixing build".into(),
            last_updated: Utc::now(),
            update_count: 1,
        }));
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("alacritty".into(), record);

        let plain = QueryOptions::layer(LayerKind::Knowledge);
        assert!(rank(&snapshot, "cargo build", &plain).is_empty());

        let enriched = QueryOptions::layer(LayerKind::Knowledge).enrich_with_vlm();
        let hits = rank(&snapshot, "cargo build", &enriched);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reserved_keys_never_match() {
        let mut snapshot = KnowledgeSnapshot::new();
        snapshot.insert("__acquisition_queue__".into(), knowledge_record("x"));
        let hits = rank(
            &snapshot,
            "__acquisition_queue__",
            &QueryOptions::layer(LayerKind::Knowledge),
        );
        assert!(hits.is_empty());
    }
}
