//! Flat JSON file storage for records.
//!
//! Each record lives in its own file named after its id, grouped into
//! collection directories under a single root:
//!
//! ```text
//! memory/
//!   episodic/episodic_20240101120000000000_x1y2z3.json
//!   non_episodic/...
//!   conversations/...
//! ```
//!
//! Writes are whole-file overwrites. There is no locking and no atomic
//! rename, so concurrent writers race (last writer wins) and a crash in the
//! middle of a write can leave a truncated file. Truncated or otherwise
//! unreadable files are skipped by [`RecordStore::load_all`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, error, info};

mod error;

pub use error::{Error, Result};

const EXTENSION: &str = "json";

/// Trait for anything that can be stored as a JSON record.
///
/// Lets the storage layer order and validate records without knowing the
/// concrete memory types.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

/// Check that an id can be used directly as a file stem.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidId(id.to_string()))
    }
}

/// Service for one-file-per-record JSON collections.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a collection.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    /// Path of a record file: `<root>/<collection>/<id>.json`.
    pub fn record_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self
            .collection_path(collection)
            .join(format!("{}.{}", id, EXTENSION)))
    }

    /// Write a record, creating the collection directory if needed.
    ///
    /// An existing file with the same id is overwritten.
    pub async fn save<R: Record>(&self, collection: &str, record: &R) -> Result<PathBuf> {
        let file_path = self.record_path(collection, record.id())?;

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Internal(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Internal(format!("Failed to serialize record: {}", e)))?;

        fs::write(&file_path, json).await.map_err(|e| {
            Error::Internal(format!(
                "Failed to write record file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        debug!(
            collection,
            record_id = %record.id(),
            file_path = %file_path.display(),
            "Record written"
        );

        Ok(file_path)
    }

    /// Read a single record. A missing file is `Ok(None)`.
    pub async fn load<R: Record>(&self, collection: &str, id: &str) -> Result<Option<R>> {
        let file_path = self.record_path(collection, id)?;

        let content = match fs::read_to_string(&file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let record = parse_record::<R>(&content, id, &file_path)?;
        Ok(Some(record))
    }

    /// Ids of every record file in a collection, unordered.
    pub async fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.collection_path(collection);
        let mut ids = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => {
                return Err(Error::Internal(format!(
                    "Failed to read collection {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                ids.push(stem.to_string_lossy().to_string());
            }
        }

        Ok(ids)
    }

    /// Read every record in a collection, oldest first.
    ///
    /// Each file is parsed on its own. Files that fail to parse, or whose
    /// `id` does not match the file name, are logged and skipped.
    pub async fn load_all<R: Record>(&self, collection: &str) -> Result<Vec<R>> {
        let ids = self.list_ids(collection).await?;
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            let file_path = match self.record_path(collection, &id) {
                Ok(path) => path,
                Err(e) => {
                    error!(
                        collection,
                        file = %id,
                        error = %e,
                        "Skipping record with unusable file name"
                    );
                    continue;
                }
            };

            let content = match fs::read_to_string(&file_path).await {
                Ok(content) => content,
                Err(e) => {
                    error!(
                        file_path = %file_path.display(),
                        error = %e,
                        "Skipping unreadable record"
                    );
                    continue;
                }
            };

            match parse_record::<R>(&content, &id, &file_path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(file_path = %file_path.display(), error = %e, "Skipping corrupt record");
                }
            }
        }

        records.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        Ok(records)
    }

    /// Remove a record file. Returns whether a file was removed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let file_path = self.record_path(collection, id)?;

        match fs::remove_file(&file_path).await {
            Ok(()) => {
                debug!(collection, record_id = %id, "Record deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Internal(format!(
                "Failed to delete record file {}: {}",
                file_path.display(),
                e
            ))),
        }
    }

    /// Keep at most `max` records in a collection by deleting the oldest.
    ///
    /// Returns the ids that were evicted, oldest first.
    pub async fn evict_oldest<R: Record>(
        &self,
        collection: &str,
        max: usize,
    ) -> Result<Vec<String>> {
        let records = self.load_all::<R>(collection).await?;
        if records.len() <= max {
            return Ok(Vec::new());
        }

        let overflow = records.len() - max;
        let mut evicted = Vec::with_capacity(overflow);
        for record in records.iter().take(overflow) {
            if self.delete(collection, record.id()).await? {
                evicted.push(record.id().to_string());
            }
        }

        info!(
            collection,
            evicted = evicted.len(),
            max,
            "Evicted oldest records over capacity"
        );

        Ok(evicted)
    }

    /// Delete every record created before `cutoff`.
    pub async fn prune_older_than<R: Record>(
        &self,
        collection: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let records = self.load_all::<R>(collection).await?;
        let mut pruned = Vec::new();

        for record in records.iter().filter(|r| r.created_at() < cutoff) {
            if self.delete(collection, record.id()).await? {
                pruned.push(record.id().to_string());
            }
        }

        if !pruned.is_empty() {
            info!(collection, pruned = pruned.len(), %cutoff, "Pruned expired records");
        }

        Ok(pruned)
    }
}

/// Parse a record file and check its id against the file name.
fn parse_record<R: Record>(content: &str, expected_id: &str, path: &Path) -> Result<R> {
    let record: R = serde_json::from_str(content)
        .map_err(|e| Error::Corrupt(format!("{}: {}", path.display(), e)))?;

    if record.id() != expected_id {
        return Err(Error::Corrupt(format!(
            "{}: id {} does not match file name",
            path.display(),
            record.id()
        )));
    }

    Ok(record)
}
