//! Memory records produced from chat turns.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{new_id, now};

/// Kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A record of a single exchange, tied to its conversation
    Episodic,
    /// A durable fact about the user, independent of any conversation
    NonEpisodic,
    /// A whole conversation viewed as a memory
    Conversation,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::NonEpisodic => "non_episodic",
            MemoryKind::Conversation => "conversation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "episodic" => Some(MemoryKind::Episodic),
            "non_episodic" | "nonepisodic" => Some(MemoryKind::NonEpisodic),
            "conversation" | "conversations" => Some(MemoryKind::Conversation),
            _ => None,
        }
    }

    /// Recover the kind from a generated id's prefix.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| id.starts_with(&format!("{}_", kind.as_str())))
    }

    /// Directory name for this kind under the memory root.
    pub fn collection(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::NonEpisodic => "non_episodic",
            MemoryKind::Conversation => "conversations",
        }
    }

    pub fn all() -> &'static [MemoryKind] {
        &[
            MemoryKind::Episodic,
            MemoryKind::NonEpisodic,
            MemoryKind::Conversation,
        ]
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored memory.
///
/// Records are immutable once written, except for `confidence` on
/// non-episodic records which may be revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub created_at: DateTime<Utc>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub hooks: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Only meaningful for non-episodic records, always within [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Only set on episodic records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl MemoryRecord {
    /// Create a record of the given kind with a fresh id and timestamp.
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: new_id(kind),
            kind,
            created_at: now(),
            content: content.into(),
            summary: None,
            hooks: BTreeSet::new(),
            tags: BTreeSet::new(),
            confidence: None,
            conversation_id: None,
        }
    }

    /// Episodic record for an exchange in `conversation_id`.
    pub fn episodic(content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        let mut record = Self::new(MemoryKind::Episodic, content);
        record.conversation_id = Some(conversation_id.into());
        record
    }

    /// Non-episodic fact with a clamped confidence.
    pub fn non_episodic(content: impl Into<String>, confidence: f32) -> Self {
        let mut record = Self::new(MemoryKind::NonEpisodic, content);
        record.confidence = Some(clamp_confidence(confidence));
        record
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hooks = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Revise the confidence of a non-episodic record.
    ///
    /// Returns false (and leaves the record untouched) for other kinds.
    pub fn set_confidence(&mut self, confidence: f32) -> bool {
        if self.kind != MemoryKind::NonEpisodic {
            return false;
        }
        self.confidence = Some(clamp_confidence(confidence));
        true
    }

    /// Age in fractional days relative to `at`. Never negative.
    pub fn age_days(&self, at: DateTime<Utc>) -> f64 {
        let seconds = (at - self.created_at).num_seconds().max(0) as f64;
        seconds / 86_400.0
    }
}

/// Clamp a confidence value into [0, 1]. NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
