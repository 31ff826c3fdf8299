//! Service layer for remind.
//!
//! - Dates (date references in text and date filters)
//! - Summarizer (rule-based summaries and titles)
//! - Metadata (keywords, themes and sentiment via the LLM)
//! - Hooks (bounded hook sets for indexing memories)
//! - Decay (recency weighting and ranking)
//! - Store (typed memory and conversation collections)
//! - Concepts (concept graph linked to memories by hook)
//! - Retriever (scored retrieval and search)
//! - Manager (turn orchestration)

mod concepts;
pub mod dates;
pub mod decay;
pub mod hooks;
mod manager;
pub mod metadata;
mod retriever;
mod store;
pub mod summarizer;

pub use concepts::{ConceptEdge, ConceptGraph, GraphView, CONCEPT_COLLECTION};
pub use hooks::HookGenerator;
pub use manager::{clean_reply, MemoryManager, MemoryStatus, TurnOutcome};
pub use metadata::{Metadata, MetadataExtractor, Sentiment};
pub use retriever::{is_temporal_query, rank_candidates, MemoryRetriever};
pub use store::{ConversationDeletion, MemoryFilter, MemoryStore};
