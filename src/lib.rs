//! remind - long-term memory for conversational assistants.
//!
//! Each chat turn extracts metadata and hooks from the user's message,
//! retrieves related memories, asks the language model for a reply with
//! those memories in context, and records what was said as episodic and
//! (when durable) non-episodic memories on disk.

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;
pub use error::{Error, Result};
pub use services::{MemoryManager, TurnOutcome};

pub use remind_llm::{LanguageModel, LlmService};
pub use remind_models::{Concept, Conversation, MemoryKind, MemoryRecord, Role};
