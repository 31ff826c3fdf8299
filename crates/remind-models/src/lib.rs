//! Data models for remind.
//!
//! Defines the memory, conversation and concept records shared by the
//! storage, retrieval and orchestration layers.
//!
//! This crate can be used with or without storage support:
//! - Default: pure data structures
//! - With `storage` feature: implements `remind_storage::Record` so records
//!   can be persisted as JSON files

mod concept;
mod conversation;
mod memory;

pub use concept::*;
pub use conversation::*;
pub use memory::*;

use chrono::{DateTime, Utc};

/// Alphabet for the random id suffix. Lowercase so ids stay filename-safe
/// on case-insensitive filesystems.
const ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Generate a new record id: `<kind>_<timestamp>_<suffix>`.
///
/// The prefix makes the record kind recoverable from the id alone and the
/// microsecond timestamp keeps ids roughly time-ordered.
pub fn new_id(kind: MemoryKind) -> String {
    format!(
        "{}_{}_{}",
        kind.as_str(),
        now().format("%Y%m%d%H%M%S%6f"),
        nanoid::nanoid!(6, &ID_ALPHABET)
    )
}

/// Current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(feature = "storage")]
mod storage_impls {
    use chrono::{DateTime, Utc};
    use remind_storage::Record;

    use crate::{Concept, Conversation, MemoryRecord};

    impl Record for MemoryRecord {
        fn id(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    impl Record for Conversation {
        fn id(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    impl Record for Concept {
        fn id(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }
}
