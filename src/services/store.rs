//! Typed storage for memories and conversations.
//!
//! Wraps [`RecordStore`] with one collection per record kind, capacity
//! enforcement, retention pruning and cascade deletion.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, Utc};
use remind_models::{Conversation, MemoryKind, MemoryRecord};
use remind_storage::RecordStore;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::{Error, Result};

use super::dates::matches_date_filter;

/// Criteria for listing memories. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Keep records carrying any of these hooks (case-insensitive)
    pub hooks: Vec<String>,
    /// Date filter such as `yesterday`, `last week`, `2024-03-05`
    pub date: Option<String>,
    pub conversation_id: Option<String>,
    pub limit: Option<usize>,
}

impl MemoryFilter {
    fn matches(&self, record: &MemoryRecord, now: chrono::DateTime<Utc>) -> bool {
        if !self.hooks.is_empty() {
            let wanted: Vec<String> = self.hooks.iter().map(|h| h.trim().to_lowercase()).collect();
            if !record
                .hooks
                .iter()
                .any(|hook| wanted.contains(&hook.to_lowercase()))
            {
                return false;
            }
        }

        if let Some(date) = &self.date {
            if !matches_date_filter(record.created_at, date, now) {
                return false;
            }
        }

        if let Some(conversation_id) = &self.conversation_id {
            let own = match record.kind {
                MemoryKind::Conversation => Some(&record.id),
                _ => record.conversation_id.as_ref(),
            };
            if own != Some(conversation_id) {
                return false;
            }
        }

        true
    }
}

/// Outcome of deleting a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDeletion {
    pub conversation_id: String,
    /// Episodic memories removed along with the conversation
    pub removed_memories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: RecordStore,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            records: RecordStore::new(config.root.clone()),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.records.root()
    }

    fn capacity(&self, kind: MemoryKind) -> Option<usize> {
        match kind {
            MemoryKind::Episodic => Some(self.config.max_episodic),
            MemoryKind::NonEpisodic => Some(self.config.max_non_episodic),
            MemoryKind::Conversation => None,
        }
    }

    /// Persist a memory record, then enforce retention and capacity for its
    /// collection.
    pub async fn save(&self, record: &MemoryRecord) -> Result<String> {
        if record.kind == MemoryKind::Conversation {
            return Err(Error::InvalidInput(
                "conversation records are saved through save_conversation".to_string(),
            ));
        }

        let collection = record.kind.collection();
        self.records.save(collection, record).await?;
        info!(memory_id = %record.id, kind = %record.kind, "Memory saved");

        let Some(max) = self.capacity(record.kind) else {
            return Ok(record.id.clone());
        };
        if self.records.list_ids(collection).await?.len() <= max {
            return Ok(record.id.clone());
        }

        // Over capacity: expired exchanges go first, then the oldest of the rest
        if record.kind == MemoryKind::Episodic && self.config.retention_days > 0 {
            let cutoff = Utc::now() - Duration::days(i64::from(self.config.retention_days));
            self.records
                .prune_older_than::<MemoryRecord>(collection, cutoff)
                .await?;
        }

        let evicted = self
            .records
            .evict_oldest::<MemoryRecord>(collection, max)
            .await?;
        if !evicted.is_empty() {
            debug!(kind = %record.kind, evicted = ?evicted, "Capacity eviction");
        }

        Ok(record.id.clone())
    }

    /// How often each hook appears across memories, most frequent first.
    ///
    /// `scope` limits the count to one kind. `None` covers episodic and
    /// non-episodic memories.
    pub async fn hook_counts(&self, scope: Option<MemoryKind>) -> Result<Vec<(String, usize)>> {
        let records = self.scoped_records(scope).await?;
        Ok(count_labels(records.iter().flat_map(|r| r.hooks.iter())))
    }

    /// How often each tag appears across memories, most frequent first.
    pub async fn tag_counts(&self, scope: Option<MemoryKind>) -> Result<Vec<(String, usize)>> {
        let records = self.scoped_records(scope).await?;
        Ok(count_labels(records.iter().flat_map(|r| r.tags.iter())))
    }

    async fn scoped_records(&self, scope: Option<MemoryKind>) -> Result<Vec<MemoryRecord>> {
        match scope {
            Some(kind) => self.load_all(kind).await,
            None => {
                let mut records = self.load_all(MemoryKind::Episodic).await?;
                records.extend(self.load_all(MemoryKind::NonEpisodic).await?);
                Ok(records)
            }
        }
    }

    /// All records of a kind, oldest first. Conversations are returned as
    /// their memory-record view.
    pub async fn load_all(&self, kind: MemoryKind) -> Result<Vec<MemoryRecord>> {
        match kind {
            MemoryKind::Conversation => {
                let conversations = self.load_conversations().await?;
                Ok(conversations.iter().map(Conversation::to_record).collect())
            }
            _ => Ok(self.records.load_all(kind.collection()).await?),
        }
    }

    /// Load any record by id. The kind is taken from the id prefix.
    pub async fn load(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let Some(kind) = MemoryKind::from_id(id) else {
            return Ok(None);
        };

        match kind {
            MemoryKind::Conversation => Ok(self
                .load_conversation(id)
                .await?
                .map(|c| c.to_record())),
            _ => Ok(self.records.load(kind.collection(), id).await?),
        }
    }

    /// Delete a memory record by id. Conversation ids cascade through
    /// [`MemoryStore::delete_conversation`].
    pub async fn delete(&self, id: &str) -> Result<bool> {
        match MemoryKind::from_id(id) {
            Some(MemoryKind::Conversation) => Ok(self.delete_conversation(id).await?.is_some()),
            Some(kind) => Ok(self.records.delete(kind.collection(), id).await?),
            None => Ok(false),
        }
    }

    /// Revise the confidence of a non-episodic record.
    pub async fn update_confidence(&self, id: &str, confidence: f32) -> Result<MemoryRecord> {
        let mut record = self
            .load(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("memory {}", id)))?;

        if !record.set_confidence(confidence) {
            return Err(Error::InvalidInput(format!(
                "confidence only applies to non_episodic memories, {} is {}",
                id, record.kind
            )));
        }

        self.records
            .save(MemoryKind::NonEpisodic.collection(), &record)
            .await?;
        info!(memory_id = %id, confidence = ?record.confidence, "Memory confidence revised");

        Ok(record)
    }

    /// List memories of a kind matching `filter`, newest first.
    pub async fn list_memories(
        &self,
        kind: MemoryKind,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        let now = Utc::now();
        let mut records: Vec<MemoryRecord> = self
            .load_all(kind)
            .await?
            .into_iter()
            .filter(|record| filter.matches(record, now))
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.records
            .save(MemoryKind::Conversation.collection(), conversation)
            .await?;
        debug!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Conversation saved"
        );
        Ok(())
    }

    pub async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .records
            .load(MemoryKind::Conversation.collection(), id)
            .await?)
    }

    async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self
            .records
            .load_all(MemoryKind::Conversation.collection())
            .await?)
    }

    /// Conversations, most recently updated first.
    pub async fn list_conversations(&self, limit: Option<usize>) -> Result<Vec<Conversation>> {
        let mut conversations = self.load_conversations().await?;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            conversations.truncate(limit);
        }
        Ok(conversations)
    }

    /// Delete a conversation and every episodic memory recorded from it.
    ///
    /// Returns `None` when the conversation does not exist. Non-episodic
    /// memories are independent of conversations and are kept.
    pub async fn delete_conversation(&self, id: &str) -> Result<Option<ConversationDeletion>> {
        let collection = MemoryKind::Conversation.collection();
        if !self.records.delete(collection, id).await? {
            return Ok(None);
        }

        let episodic: Vec<MemoryRecord> = self
            .records
            .load_all(MemoryKind::Episodic.collection())
            .await?;

        let mut removed_memories = Vec::new();
        for record in episodic
            .iter()
            .filter(|r| r.conversation_id.as_deref() == Some(id))
        {
            match self
                .records
                .delete(MemoryKind::Episodic.collection(), &record.id)
                .await
            {
                Ok(true) => removed_memories.push(record.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(memory_id = %record.id, error = %e, "Failed to delete episodic memory");
                }
            }
        }

        info!(
            conversation_id = %id,
            removed = removed_memories.len(),
            "Conversation deleted"
        );

        Ok(Some(ConversationDeletion {
            conversation_id: id.to_string(),
            removed_memories,
        }))
    }
}

/// Case-insensitive label counts, highest count first, ties by label.
fn count_labels<'a>(labels: impl Iterator<Item = &'a String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for label in labels {
        let label = label.trim().to_lowercase();
        if !label.is_empty() {
            *counts.entry(label).or_default() += 1;
        }
    }

    let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}
