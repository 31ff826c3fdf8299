//! Turn orchestration.
//!
//! A turn runs extract -> retrieve -> reply -> persist. Only a failed reply
//! fails the turn, and in that case nothing is written. Anything that goes
//! wrong while recording memories after a successful reply is logged and
//! the reply is still returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use remind_llm::{extract_json, CompletionRequest, LanguageModel, PromptMessage};
use remind_models::{clamp_confidence, Concept, Conversation, MemoryKind, MemoryRecord, Role};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::concepts::{ConceptGraph, GraphView};
use super::hooks::{category_tags, HookGenerator};
use super::metadata::{Metadata, MetadataExtractor};
use super::retriever::MemoryRetriever;
use super::store::{ConversationDeletion, MemoryFilter, MemoryStore};
use super::summarizer::{summarize, title_from, DEFAULT_SUMMARY_LEN};

/// Openers a model sometimes uses to narrate its reply instead of giving it.
const META_PREFIXES: &[&str] = &[
    "i'll acknowledge",
    "let me acknowledge",
    "i'll respond",
    "i should respond",
    "i should",
    "i'm going to",
    "i will now",
    "let me provide",
    "i'll give",
    "i need to",
    "i notice that",
    "my response should",
];

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid quote pattern"));

static FIRST_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?:]\s+").expect("valid sentence pattern"));

/// Strip narration such as `I'll respond warmly: "Hi!"` down to the reply.
///
/// Replies that do not open with a narration phrase are only trimmed.
pub fn clean_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    let lower = trimmed.to_lowercase();
    if !META_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return trimmed.to_string();
    }

    if let Some(caps) = QUOTED.captures(trimmed) {
        let quoted = caps[1].trim();
        if !quoted.is_empty() {
            return quoted.to_string();
        }
    }

    if let Some(end) = FIRST_SENTENCE_END.find(trimmed) {
        let rest = trimmed[end.end()..].trim();
        if rest.chars().count() > 20 {
            return rest.to_string();
        }
    }

    trimmed.to_string()
}

/// Result of one chat turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub assistant_reply: String,
    pub conversation_id: String,
    /// True when the turn started a conversation
    pub new_conversation: bool,
    /// Memories that were placed in the reply prompt
    pub memories_used: Vec<MemoryRecord>,
}

/// Record counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatus {
    pub episodic: usize,
    pub non_episodic: usize,
    pub conversations: usize,
    pub concepts: usize,
}

#[derive(Debug, Default, Deserialize)]
struct DurableVerdict {
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    facts: Vec<DurableFact>,
}

#[derive(Debug, Deserialize)]
struct DurableFact {
    content: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    hooks: Vec<String>,
}

/// Comparison key for fact contents: lowercase, single spaces, no trailing
/// punctuation.
fn fact_key(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

fn render_memories(memories: &[MemoryRecord]) -> String {
    if memories.is_empty() {
        return "No relevant memories were found.".to_string();
    }

    let lines: Vec<String> = memories
        .iter()
        .map(|memory| {
            let date = memory.created_at.format("%Y-%m-%d");
            match memory.kind {
                MemoryKind::NonEpisodic => format!(
                    "- [fact, {}] {} (confidence {:.2})",
                    date,
                    memory.content,
                    memory.confidence.unwrap_or(0.0)
                ),
                _ => format!(
                    "- [exchange, {}] {}",
                    date,
                    memory.summary.as_deref().unwrap_or(&memory.content)
                ),
            }
        })
        .collect();

    format!("Relevant memories:\n{}", lines.join("\n"))
}

/// Chat orchestrator: owns the memory services and the language model.
pub struct MemoryManager {
    llm: Arc<dyn LanguageModel>,
    config: Config,
    store: MemoryStore,
    extractor: MetadataExtractor,
    hooks: HookGenerator,
    retriever: MemoryRetriever,
    concepts: ConceptGraph,
}

impl MemoryManager {
    pub fn new(config: &Config, llm: Arc<dyn LanguageModel>) -> Self {
        let store = MemoryStore::new(config.memory.clone());
        let extractor = MetadataExtractor::new(llm.clone(), config.chat.fast_model.clone());
        let hooks = HookGenerator::new(extractor.clone(), config.hooks.clone());
        let retriever = MemoryRetriever::new(store.clone(), config.retrieval.clone());
        let concepts = ConceptGraph::new(config.memory.root.clone());

        Self {
            llm,
            config: config.clone(),
            store,
            extractor,
            hooks,
            retriever,
            concepts,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Handle one user message.
    ///
    /// `conversation_id` continues an existing conversation; `None` or an
    /// unknown id starts a new one.
    pub async fn handle_turn(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
    ) -> Result<TurnOutcome> {
        let message = user_message.trim();
        if message.is_empty() {
            return Err(Error::InvalidInput("message must not be empty".to_string()));
        }

        let (mut conversation, new_conversation) = self.resolve_conversation(conversation_id).await;

        let metadata = self.extractor.extract(message).await;
        let query_hooks = self
            .hooks
            .derive(message, &metadata, self.config.hooks.max_hooks);

        let memories = match self
            .retriever
            .retrieve(message, &query_hooks, self.config.retrieval.limit)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "Memory retrieval failed, replying without memories");
                Vec::new()
            }
        };

        let request = self.reply_request(&conversation, message, &memories);
        let completion = self.llm.complete(request).await?;
        let reply = clean_reply(&completion.text);

        info!(
            conversation_id = %conversation.id,
            provider = %completion.provider,
            memories = memories.len(),
            "Reply generated"
        );

        conversation.push(Role::User, message);
        conversation.push(Role::Assistant, reply.clone());
        self.refresh_conversation(&mut conversation, &query_hooks);
        if let Err(e) = self.store.save_conversation(&conversation).await {
            error!(conversation_id = %conversation.id, error = %e, "Failed to save conversation");
        }

        match self
            .remember_exchange(&conversation.id, message, &reply, &metadata)
            .await
        {
            Ok(episode) => self.index_concepts(&episode).await,
            Err(e) => error!(
                conversation_id = %conversation.id,
                error = %e,
                "Failed to record episodic memory"
            ),
        }

        match self.learn_facts(message, &reply).await {
            Ok(0) => {}
            Ok(learned) => debug!(learned, "Durable facts recorded"),
            Err(e) => error!(error = %e, "Failed to record durable facts"),
        }

        Ok(TurnOutcome {
            assistant_reply: reply,
            conversation_id: conversation.id,
            new_conversation,
            memories_used: memories,
        })
    }

    async fn resolve_conversation(&self, id: Option<&str>) -> (Conversation, bool) {
        let Some(id) = id else {
            return (Conversation::new(), true);
        };

        match self.store.load_conversation(id).await {
            Ok(Some(conversation)) => (conversation, false),
            Ok(None) => {
                info!(requested = %id, "Unknown conversation, starting a new one");
                (Conversation::new(), true)
            }
            Err(e) => {
                warn!(
                    requested = %id,
                    error = %e,
                    "Could not load conversation, starting a new one"
                );
                (Conversation::new(), true)
            }
        }
    }

    fn reply_request(
        &self,
        conversation: &Conversation,
        message: &str,
        memories: &[MemoryRecord],
    ) -> CompletionRequest {
        let system = format!(
            "You are a helpful assistant with long-term memory of earlier \
             conversations with this user.\n\
             Use the memories below when they are relevant and never invent \
             memories you do not have.\n\
             Answer the user directly without describing what you are about to say.\n\n{}",
            render_memories(memories)
        );

        let mut messages: Vec<PromptMessage> = conversation
            .recent(self.config.chat.history_messages)
            .iter()
            .map(|m| match m.role {
                Role::User => PromptMessage::user(m.content.clone()),
                Role::Assistant => PromptMessage::assistant(m.content.clone()),
            })
            .collect();
        messages.push(PromptMessage::user(message));

        CompletionRequest::with_messages(messages)
            .system(system)
            .model(self.config.chat.chat_model.clone())
            .max_tokens(self.config.chat.reply_max_tokens)
            .temperature(0.7)
    }

    fn refresh_conversation(&self, conversation: &mut Conversation, hooks: &BTreeSet<String>) {
        if conversation.title.is_empty() {
            if let Some(first) = conversation.first_user_message() {
                conversation.title = title_from(first);
            }
        }
        conversation.summary = summarize(&conversation.transcript(), DEFAULT_SUMMARY_LEN);

        for hook in hooks {
            if conversation.tags.len() >= self.config.hooks.max_hooks {
                break;
            }
            conversation.tags.insert(hook.clone());
        }
    }

    async fn remember_exchange(
        &self,
        conversation_id: &str,
        message: &str,
        reply: &str,
        metadata: &Metadata,
    ) -> Result<MemoryRecord> {
        let exchange = format!("User: {}\nAssistant: {}", message, reply);
        // Speaker labels would otherwise become hooks on every exchange
        let hooks = self.hooks.derive(
            &format!("{}\n{}", message, reply),
            metadata,
            self.config.hooks.max_hooks,
        );

        let mut tags = category_tags(message);
        tags.insert(metadata.sentiment.as_str().to_string());

        let record = MemoryRecord::episodic(exchange.clone(), conversation_id)
            .with_summary(summarize(&exchange, DEFAULT_SUMMARY_LEN))
            .with_hooks(hooks)
            .with_tags(tags);

        self.store.save(&record).await?;
        Ok(record)
    }

    /// Link a stored memory into the concept graph. Failures only cost the
    /// graph update.
    async fn index_concepts(&self, record: &MemoryRecord) {
        if let Err(e) = self.concepts.record_memory(&record.id, &record.hooks).await {
            warn!(memory_id = %record.id, error = %e, "Failed to update concept graph");
        }
    }

    /// Ask the model whether the exchange reveals durable facts and store
    /// those above the confidence threshold. Returns how many facts were
    /// stored or revised.
    async fn learn_facts(&self, message: &str, reply: &str) -> Result<usize> {
        let prompt = format!(
            r#"Decide whether the exchange below reveals durable facts about the user: stable preferences, personal details, relationships or long-term plans. Ignore small talk, questions and anything that only matters right now.

Return JSON:
{{"durable": true, "facts": [{{"content": "User's favorite color is blue", "confidence": 0.9, "hooks": ["favorite color", "blue"]}}]}}
Return {{"durable": false, "facts": []}} when nothing qualifies.

Exchange to classify:
User: {message}
Assistant: {reply}"#
        );

        let request = CompletionRequest::new(prompt)
            .model(self.config.chat.fast_model.clone())
            .max_tokens(512)
            .temperature(0.0);

        let completion = match self.llm.complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(
                    error = %e,
                    "Durable fact classification failed, treating exchange as not durable"
                );
                return Ok(0);
            }
        };

        let verdict: DurableVerdict = extract_json(&completion.text)
            .and_then(|json| serde_json::from_value(json).ok())
            .unwrap_or_default();

        if !verdict.durable {
            return Ok(0);
        }

        let min_confidence = self.config.chat.durable_min_confidence;
        let mut known = self.store.load_all(MemoryKind::NonEpisodic).await?;
        let mut learned = 0;

        for fact in verdict.facts {
            let content = fact.content.trim();
            if content.is_empty() {
                continue;
            }

            let confidence = clamp_confidence(fact.confidence.unwrap_or(0.0));
            if confidence < min_confidence {
                debug!(content = %content, confidence, "Fact below confidence threshold");
                continue;
            }

            let key = fact_key(content);
            if let Some(existing) = known.iter_mut().find(|r| fact_key(&r.content) == key) {
                if confidence > existing.confidence.unwrap_or(0.0) {
                    let revised = self.store.update_confidence(&existing.id, confidence).await?;
                    *existing = revised;
                    learned += 1;
                }
                continue;
            }

            let seeded = Metadata {
                keywords: fact.hooks,
                ..Metadata::default()
            };
            let record = MemoryRecord::non_episodic(content, confidence)
                .with_hooks(self.hooks.derive(content, &seeded, self.config.hooks.max_hooks))
                .with_tags(category_tags(content));

            self.store.save(&record).await?;
            self.index_concepts(&record).await;
            known.push(record);
            learned += 1;
        }

        Ok(learned)
    }

    pub async fn list_memories(
        &self,
        kind: MemoryKind,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        self.store.list_memories(kind, filter).await
    }

    pub async fn search(
        &self,
        query: &str,
        scope: Option<MemoryKind>,
    ) -> Result<Vec<MemoryRecord>> {
        self.retriever.search(query, scope).await
    }

    /// Delete a conversation, its episodic memories and their concept links.
    pub async fn delete_conversation(&self, id: &str) -> Result<ConversationDeletion> {
        let deletion = self
            .store
            .delete_conversation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))?;

        if let Err(e) = self.concepts.unlink_memories(&deletion.removed_memories).await {
            warn!(conversation_id = %id, error = %e, "Failed to unlink deleted memories");
        }
        Ok(deletion)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        self.store
            .load_conversation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))
    }

    pub async fn list_conversations(&self, limit: Option<usize>) -> Result<Vec<Conversation>> {
        self.store.list_conversations(limit).await
    }

    /// Hooks with the number of memories carrying them, most used first.
    /// `None` counts episodic and non-episodic memories.
    pub async fn list_hooks(&self, scope: Option<MemoryKind>) -> Result<Vec<(String, usize)>> {
        self.store.hook_counts(scope).await
    }

    pub async fn list_tags(&self, scope: Option<MemoryKind>) -> Result<Vec<(String, usize)>> {
        self.store.tag_counts(scope).await
    }

    pub async fn list_concepts(&self) -> Result<Vec<Concept>> {
        self.concepts.list().await
    }

    pub async fn get_concept(&self, name: &str) -> Result<Concept> {
        self.concepts
            .get(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("concept {}", name)))
    }

    pub async fn search_concepts(&self, query: &str) -> Result<Vec<Concept>> {
        self.concepts.search(query).await
    }

    /// Set a concept's type and add traits, creating the concept if needed.
    pub async fn describe_concept(
        &self,
        name: &str,
        concept_type: Option<&str>,
        traits: &[(&str, &str)],
    ) -> Result<Concept> {
        self.concepts
            .update(name, |concept| {
                if let Some(concept_type) = concept_type {
                    concept.set_type(concept_type);
                }
                for (key, value) in traits {
                    concept.add_trait(key, value);
                }
            })
            .await
    }

    pub async fn merge_concepts(&self, primary: &str, secondary: &str) -> Result<Concept> {
        self.concepts.merge(primary, secondary).await
    }

    pub async fn concept_graph(&self) -> Result<GraphView> {
        self.concepts.graph().await
    }

    pub async fn status(&self) -> Result<MemoryStatus> {
        Ok(MemoryStatus {
            episodic: self.store.load_all(MemoryKind::Episodic).await?.len(),
            non_episodic: self.store.load_all(MemoryKind::NonEpisodic).await?.len(),
            conversations: self.store.list_conversations(None).await?.len(),
            concepts: self.concepts.list().await?.len(),
        })
    }
}
