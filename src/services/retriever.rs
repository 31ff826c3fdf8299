//! Memory retrieval.
//!
//! Candidates are the episodic and non-episodic collections. A candidate
//! qualifies when it shares at least one hook with the query, contains the
//! query text, or (for queries naming a date) was created on that date.
//! Qualified candidates are ranked by
//!
//! ```text
//! score = hook_weight * overlap + substring_weight * substring_hit + recency_weight * recency
//! ```
//!
//! where recency halves every `half_life_days`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use remind_models::{MemoryKind, MemoryRecord};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::Result;

use super::dates::{date_filter_from_query, matches_date_filter};
use super::decay::{rank_by_score, recency, ScoredResult};
use super::store::MemoryStore;

/// Phrases that mark a query as asking about earlier conversations.
const RECALL_PHRASES: &[&str] = &[
    "yesterday",
    "last week",
    "last month",
    "last time",
    "previously",
    "before",
    "earlier",
    "remember",
    "recall",
    "mentioned",
    "talked about",
    "discussed",
    "said",
    "told",
    "asked",
];

/// Whether `query` asks about the past.
pub fn is_temporal_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    RECALL_PHRASES.iter().any(|phrase| lower.contains(phrase))
        || date_filter_from_query(query).is_some()
}

/// Score and rank `candidates` against a query. Pure; `now` is explicit.
pub fn rank_candidates(
    candidates: Vec<MemoryRecord>,
    query_text: &str,
    query_hooks: &BTreeSet<String>,
    limit: usize,
    config: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Vec<ScoredResult<MemoryRecord>> {
    if limit == 0 {
        return Vec::new();
    }

    let needle = query_text.trim().to_lowercase();
    let wanted: BTreeSet<String> = query_hooks.iter().map(|h| h.to_lowercase()).collect();
    let date_filter = date_filter_from_query(query_text);

    let mut scored: Vec<ScoredResult<MemoryRecord>> = candidates
        .into_iter()
        .filter_map(|record| {
            let overlap = record
                .hooks
                .iter()
                .filter(|hook| wanted.contains(&hook.to_lowercase()))
                .count();

            let substring_hit = !needle.is_empty()
                && (record.content.to_lowercase().contains(&needle)
                    || record
                        .summary
                        .as_ref()
                        .is_some_and(|s| s.to_lowercase().contains(&needle)));

            let date_hit = date_filter
                .as_deref()
                .is_some_and(|filter| matches_date_filter(record.created_at, filter, now));

            if overlap == 0 && !substring_hit && !date_hit {
                return None;
            }

            let recency = recency(record.created_at, now, config.half_life_days);
            let score = config.hook_weight * overlap as f64
                + config.substring_weight * f64::from(u8::from(substring_hit))
                + config.recency_weight * recency;

            Some(ScoredResult {
                item: record,
                overlap,
                substring_hit,
                recency,
                score,
            })
        })
        .collect();

    rank_by_score(&mut scored, |r| r.created_at, |r| r.id.as_str());
    scored.truncate(limit);
    scored
}

/// Retrieves memories relevant to a query.
#[derive(Debug, Clone)]
pub struct MemoryRetriever {
    store: MemoryStore,
    config: RetrievalConfig,
}

impl MemoryRetriever {
    pub fn new(store: MemoryStore, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    async fn candidates(&self) -> Result<Vec<MemoryRecord>> {
        let mut candidates = self.store.load_all(MemoryKind::Episodic).await?;
        candidates.extend(self.store.load_all(MemoryKind::NonEpisodic).await?);
        Ok(candidates)
    }

    /// Up to `limit` memories ranked by relevance to the query.
    ///
    /// Queries about the past fall back to the most recent memories when
    /// nothing qualifies.
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_hooks: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.candidates().await?;
        let total = candidates.len();
        let now = Utc::now();

        let ranked = rank_candidates(
            candidates.clone(),
            query_text,
            query_hooks,
            limit,
            &self.config,
            now,
        );

        if ranked.is_empty() && is_temporal_query(query_text) {
            let mut recent = candidates;
            recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            recent.truncate(limit);
            debug!(count = recent.len(), "Temporal query fell back to recent memories");
            return Ok(recent);
        }

        info!(
            candidates = total,
            returned = ranked.len(),
            hooks = query_hooks.len(),
            "Memories retrieved"
        );

        Ok(ranked.into_iter().map(|r| r.item).collect())
    }

    /// Case-insensitive search over content, summary, hooks and tags.
    ///
    /// `scope` restricts the search to one kind; `None` searches all kinds,
    /// conversations included. Results are newest first.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<MemoryKind>,
    ) -> Result<Vec<MemoryRecord>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let kinds: Vec<MemoryKind> = match scope {
            Some(kind) => vec![kind],
            None => MemoryKind::all().to_vec(),
        };

        let mut found = Vec::new();
        for kind in kinds {
            found.extend(
                self.store
                    .load_all(kind)
                    .await?
                    .into_iter()
                    .filter(|record| record_contains(record, &needle)),
            );
        }

        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        debug!(query = %query, results = found.len(), "Memory search");
        Ok(found)
    }
}

fn record_contains(record: &MemoryRecord, needle: &str) -> bool {
    record.content.to_lowercase().contains(needle)
        || record
            .summary
            .as_ref()
            .is_some_and(|s| s.to_lowercase().contains(needle))
        || record
            .hooks
            .iter()
            .chain(record.tags.iter())
            .any(|h| h.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use chrono::Duration;
    use remind_models::{Conversation, Role};
    use tempfile::TempDir;

    fn hooks(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn retriever() -> (TempDir, MemoryRetriever) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(MemoryConfig {
            root: dir.path().to_path_buf(),
            retention_days: 0,
            ..MemoryConfig::default()
        });
        (dir, MemoryRetriever::new(store, RetrievalConfig::default()))
    }

    #[test]
    fn test_only_qualified_candidates() {
        let now = Utc::now();
        let records = vec![
            MemoryRecord::non_episodic("User's favorite color is blue", 0.9)
                .with_hooks(["favorite color", "blue"]),
            MemoryRecord::non_episodic("User owns a cat", 0.9).with_hooks(["cat", "pets"]),
        ];
        let ranked = rank_candidates(
            records,
            "what is my favorite color?",
            &hooks(&["favorite color", "color"]),
            5,
            &RetrievalConfig::default(),
            now,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.content, "User's favorite color is blue");
        assert_eq!(ranked[0].overlap, 1);
        assert!(!ranked[0].substring_hit);
    }

    #[test]
    fn test_substring_hit_qualifies() {
        let now = Utc::now();
        let records = vec![MemoryRecord::episodic(
            "User: I adopted a dog named Rex",
            "conversation_a",
        )];
        let ranked = rank_candidates(
            records,
            "Named Rex",
            &BTreeSet::new(),
            5,
            &RetrievalConfig::default(),
            now,
        );
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].substring_hit);
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_more_overlap_ranks_higher_at_equal_age() {
        let now = Utc::now();
        let created = now - Duration::days(2);
        let one = MemoryRecord::non_episodic("one", 0.9)
            .with_hooks(["tea"])
            .with_created_at(created);
        let two = MemoryRecord::non_episodic("two", 0.9)
            .with_hooks(["tea", "green tea"])
            .with_created_at(created);
        let ranked = rank_candidates(
            vec![one, two],
            "tea",
            &hooks(&["tea", "green tea"]),
            5,
            &RetrievalConfig::default(),
            now,
        );
        assert_eq!(ranked[0].item.content, "two");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_newer_ranks_higher_at_equal_overlap() {
        let now = Utc::now();
        let old = MemoryRecord::non_episodic("old", 0.9)
            .with_hooks(["tea"])
            .with_created_at(now - Duration::days(40));
        let new = MemoryRecord::non_episodic("new", 0.9)
            .with_hooks(["tea"])
            .with_created_at(now - Duration::days(1));
        let ranked = rank_candidates(
            vec![old, new],
            "coffee",
            &hooks(&["tea"]),
            5,
            &RetrievalConfig::default(),
            now,
        );
        assert_eq!(ranked[0].item.content, "new");
        assert!(ranked[0].recency > ranked[1].recency);
    }

    #[test]
    fn test_limit_and_hook_case() {
        let now = Utc::now();
        let records: Vec<_> = (0..8)
            .map(|i| {
                MemoryRecord::non_episodic(format!("fact {}", i), 0.9)
                    .with_hooks(["Rust"])
                    .with_created_at(now - Duration::hours(i))
            })
            .collect();
        let ranked = rank_candidates(
            records,
            "",
            &hooks(&["rust"]),
            3,
            &RetrievalConfig::default(),
            now,
        );
        let contents: Vec<_> = ranked.iter().map(|r| r.item.content.as_str()).collect();
        assert_eq!(contents, vec!["fact 0", "fact 1", "fact 2"]);
        assert!(rank_candidates(
            vec![],
            "x",
            &hooks(&["rust"]),
            0,
            &RetrievalConfig::default(),
            now
        )
        .is_empty());
    }

    #[test]
    fn test_date_reference_qualifies() {
        let now = Utc::now();
        let today = MemoryRecord::episodic("User: went running", "conversation_a")
            .with_created_at(now);
        let old = MemoryRecord::episodic("User: went swimming", "conversation_b")
            .with_created_at(now - Duration::days(10));
        let ranked = rank_candidates(
            vec![today, old],
            "what did I do today?",
            &BTreeSet::new(),
            5,
            &RetrievalConfig::default(),
            now,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.content, "User: went running");
    }

    #[test]
    fn test_temporal_detection() {
        assert!(is_temporal_query("What did we talk about last time?"));
        assert!(is_temporal_query("Do you remember my dog?"));
        assert!(is_temporal_query("anything on 2024-03-05"));
        assert!(!is_temporal_query("What is the capital of France?"));
    }

    #[tokio::test]
    async fn test_retrieve_from_store() {
        let (_dir, retriever) = retriever();
        let fact = MemoryRecord::non_episodic("User's favorite color is blue", 0.9)
            .with_hooks(["favorite color", "blue"]);
        retriever.store.save(&fact).await.unwrap();
        retriever
            .store
            .save(&MemoryRecord::episodic("User: hello", "conversation_a").with_hooks(["hello"]))
            .await
            .unwrap();

        let found = retriever
            .retrieve("what's my favorite color", &hooks(&["favorite color"]), 5)
            .await
            .unwrap();
        assert_eq!(found, vec![fact]);

        let none = retriever
            .retrieve("quantum physics", &hooks(&["physics"]), 5)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_temporal_fallback_returns_recent() {
        let (_dir, retriever) = retriever();
        let now = Utc::now();
        for i in 0..4 {
            let record = MemoryRecord::episodic(format!("User: topic {}", i), "conversation_a")
                .with_hooks([format!("topic{}", i)])
                .with_created_at(now - Duration::hours(i));
            retriever.store.save(&record).await.unwrap();
        }

        let found = retriever
            .retrieve("What did we discuss before?", &hooks(&["discuss"]), 2)
            .await
            .unwrap();
        let contents: Vec<_> = found.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["User: topic 0", "User: topic 1"]);
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let (_dir, retriever) = retriever();
        let mut conversation = Conversation::new();
        conversation.push(Role::User, "Tell me about Lisbon");
        retriever.store.save_conversation(&conversation).await.unwrap();
        retriever
            .store
            .save(&MemoryRecord::non_episodic("User plans a trip to Lisbon", 0.8))
            .await
            .unwrap();
        retriever
            .store
            .save(
                &MemoryRecord::episodic("User: unrelated", "conversation_x").with_hooks(["lisbon"]),
            )
            .await
            .unwrap();

        assert_eq!(retriever.search("LISBON", None).await.unwrap().len(), 3);
        assert_eq!(
            retriever
                .search("lisbon", Some(MemoryKind::NonEpisodic))
                .await
                .unwrap()
                .len(),
            1
        );
        let conversations = retriever
            .search("lisbon", Some(MemoryKind::Conversation))
            .await
            .unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, conversation.id);
        assert!(retriever.search("  ", None).await.unwrap().is_empty());
    }
}
