//! Integration tests for JSON record collections.

use chrono::{DateTime, Duration, Utc};
use remind_storage::{Error, Record, RecordStore};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    id: String,
    created_at: DateTime<Utc>,
    body: String,
}

impl Record for Note {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn note(id: &str, age_days: i64) -> Note {
    Note {
        id: id.to_string(),
        created_at: Utc::now() - Duration::days(age_days),
        body: format!("body of {}", id),
    }
}

fn store() -> (TempDir, RecordStore) {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::new(dir.path().join("memory"));
    (dir, store)
}

// ============================================================================
// Basic persistence
// ============================================================================

#[tokio::test]
async fn test_save_then_load_returns_equal_record() {
    let (_dir, store) = store();
    let original = note("note_1", 0);

    let path = store.save("notes", &original).await.unwrap();
    assert!(path.ends_with("notes/note_1.json"));

    let loaded: Option<Note> = store.load("notes", "note_1").await.unwrap();
    assert_eq!(loaded, Some(original));
}

#[tokio::test]
async fn test_load_missing_is_none() {
    let (_dir, store) = store();
    let loaded: Option<Note> = store.load("notes", "absent").await.unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn test_save_overwrites_existing_file() {
    let (_dir, store) = store();
    let mut record = note("note_1", 0);
    store.save("notes", &record).await.unwrap();

    record.body = "changed".to_string();
    store.save("notes", &record).await.unwrap();

    let all: Vec<Note> = store.load_all("notes").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].body, "changed");
}

#[tokio::test]
async fn test_delete_reports_presence() {
    let (_dir, store) = store();
    store.save("notes", &note("note_1", 0)).await.unwrap();

    assert!(store.delete("notes", "note_1").await.unwrap());
    assert!(!store.delete("notes", "note_1").await.unwrap());
}

#[tokio::test]
async fn test_invalid_id_is_rejected() {
    let (_dir, store) = store();
    let bad = note("../outside", 0);
    let err = store.save("notes", &bad).await.unwrap_err();
    assert!(matches!(err, Error::InvalidId(_)));
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_load_all_on_missing_collection_is_empty() {
    let (_dir, store) = store();
    let all: Vec<Note> = store.load_all("notes").await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_load_all_orders_oldest_first() {
    let (_dir, store) = store();
    store.save("notes", &note("b", 1)).await.unwrap();
    store.save("notes", &note("a", 3)).await.unwrap();
    store.save("notes", &note("c", 0)).await.unwrap();

    let all: Vec<Note> = store.load_all("notes").await.unwrap();
    let ids: Vec<_> = all.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_load_all_skips_corrupt_and_mismatched_files() {
    let (_dir, store) = store();
    store.save("notes", &note("good", 0)).await.unwrap();

    let dir = store.collection_path("notes");
    tokio::fs::write(dir.join("broken.json"), "{ not json")
        .await
        .unwrap();

    let mut impostor = note("someone_else", 0);
    impostor.body = "wrong file".to_string();
    let json = serde_json::to_string(&impostor).unwrap();
    tokio::fs::write(dir.join("renamed.json"), json).await.unwrap();

    tokio::fs::write(dir.join("README.txt"), "ignored").await.unwrap();

    let all: Vec<Note> = store.load_all("notes").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "good");
}

#[tokio::test]
async fn test_load_of_mismatched_file_is_corrupt() {
    let (_dir, store) = store();
    let dir = store.collection_path("notes");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let json = serde_json::to_string(&note("other", 0)).unwrap();
    tokio::fs::write(dir.join("note_1.json"), json).await.unwrap();

    let err = store.load::<Note>("notes", "note_1").await.unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)));
}

// ============================================================================
// Capacity and retention
// ============================================================================

#[tokio::test]
async fn test_evict_oldest_keeps_newest_max() {
    let (_dir, store) = store();
    for (i, age) in [5, 4, 3, 2, 1].iter().enumerate() {
        store
            .save("notes", &note(&format!("n{}", i), *age))
            .await
            .unwrap();
    }

    let evicted = store.evict_oldest::<Note>("notes", 3).await.unwrap();
    assert_eq!(evicted, vec!["n0".to_string(), "n1".to_string()]);

    let remaining: Vec<Note> = store.load_all("notes").await.unwrap();
    let ids: Vec<_> = remaining.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n2", "n3", "n4"]);
}

#[tokio::test]
async fn test_evict_under_capacity_is_noop() {
    let (_dir, store) = store();
    store.save("notes", &note("only", 0)).await.unwrap();

    let evicted = store.evict_oldest::<Note>("notes", 3).await.unwrap();
    assert!(evicted.is_empty());
}

#[tokio::test]
async fn test_prune_older_than_cutoff() {
    let (_dir, store) = store();
    store.save("notes", &note("old", 40)).await.unwrap();
    store.save("notes", &note("fresh", 2)).await.unwrap();

    let cutoff = Utc::now() - Duration::days(30);
    let pruned = store.prune_older_than::<Note>("notes", cutoff).await.unwrap();
    assert_eq!(pruned, vec!["old".to_string()]);

    let remaining: Vec<Note> = store.load_all("notes").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "fresh");
}
