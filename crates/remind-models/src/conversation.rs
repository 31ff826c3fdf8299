//! Conversation transcripts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{new_id, now, MemoryKind, MemoryRecord};

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used in transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now(),
        }
    }
}

/// A conversation. Messages are append-only; title, summary and tags are
/// recomputed after each turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Conversation {
    pub fn new() -> Self {
        let created_at = now();
        Self {
            id: new_id(MemoryKind::Conversation),
            created_at,
            updated_at: created_at,
            title: String::new(),
            summary: String::new(),
            messages: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Append a message and bump `updated_at`.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        let message = ChatMessage::new(role, content);
        self.updated_at = message.timestamp;
        self.messages.push(message);
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Plain-text transcript, one `Speaker: text` line per message.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// View this conversation as a memory record of kind `conversation`.
    pub fn to_record(&self) -> MemoryRecord {
        MemoryRecord {
            id: self.id.clone(),
            kind: MemoryKind::Conversation,
            created_at: self.created_at,
            content: self.transcript(),
            summary: (!self.summary.is_empty()).then(|| self.summary.clone()),
            hooks: self.tags.clone(),
            tags: self.tags.clone(),
            confidence: None,
            conversation_id: None,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_recent() {
        let mut conversation = Conversation::new();
        conversation.push(Role::User, "one");
        conversation.push(Role::Assistant, "two");
        conversation.push(Role::User, "three");

        let recent = conversation.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[1].content, "three");
        assert_eq!(conversation.recent(10).len(), 3);
        assert!(conversation.updated_at >= conversation.created_at);
    }

    #[test]
    fn test_transcript_and_record_view() {
        let mut conversation = Conversation::new();
        conversation.push(Role::User, "My favorite color is blue");
        conversation.push(Role::Assistant, "Noted!");
        conversation.tags.insert("color".to_string());

        assert_eq!(
            conversation.transcript(),
            "User: My favorite color is blue\nAssistant: Noted!"
        );

        let record = conversation.to_record();
        assert_eq!(record.id, conversation.id);
        assert_eq!(record.kind, MemoryKind::Conversation);
        assert!(record.content.contains("blue"));
        assert!(record.summary.is_none());
        assert!(record.hooks.contains("color"));
    }

    #[test]
    fn test_first_user_message() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.first_user_message(), None);
        conversation.push(Role::Assistant, "Welcome");
        conversation.push(Role::User, "hello");
        assert_eq!(conversation.first_user_message(), Some("hello"));
    }
}
