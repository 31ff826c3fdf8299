//! remind - chat with a model that remembers earlier conversations.
//!
//! Reads lines from stdin. Lines starting with `/` are commands, anything
//! else is sent as a chat turn.

use std::sync::Arc;

use remind::services::{MemoryFilter, MemoryManager};
use remind::{Concept, Config, LlmService, MemoryKind, MemoryRecord};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LIST_LIMIT: usize = 20;

#[derive(Debug, PartialEq)]
enum Command<'a> {
    New,
    Memories(Option<&'a str>),
    Search(&'a str),
    Delete(&'a str),
    Hooks(Option<&'a str>),
    Tags,
    Concepts(Option<&'a str>),
    Graph,
    Merge(&'a str, &'a str),
    Status,
    Quit,
    Unknown(&'a str),
    Chat(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Command::Chat(line);
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name {
            "new" => Command::New,
            "memories" => Command::Memories((!arg.is_empty()).then_some(arg)),
            "search" => Command::Search(arg),
            "delete" => Command::Delete(arg),
            "hooks" => Command::Hooks((!arg.is_empty()).then_some(arg)),
            "tags" => Command::Tags,
            "concepts" => Command::Concepts((!arg.is_empty()).then_some(arg)),
            "graph" => Command::Graph,
            "merge" => match arg.split_once(',') {
                Some((primary, secondary)) => Command::Merge(primary.trim(), secondary.trim()),
                None => Command::Merge(arg, ""),
            },
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(name),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "remind=info,remind_llm=info,remind_storage=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    // Logs go to stderr so they never interleave with replies on stdout
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_records(records: &[MemoryRecord]) {
    if records.is_empty() {
        println!("(nothing found)");
        return;
    }
    for record in records {
        let text = record.summary.as_deref().unwrap_or(&record.content);
        println!(
            "{} [{}] {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M"),
            text.replace('\n', " | ")
        );
    }
}

fn print_counts(counts: &[(String, usize)]) {
    if counts.is_empty() {
        println!("(nothing found)");
    }
    for (label, count) in counts.iter().take(LIST_LIMIT) {
        println!("{:>4}  {}", count, label);
    }
}

fn print_concepts(concepts: &[Concept]) {
    if concepts.is_empty() {
        println!("(nothing found)");
    }
    for concept in concepts.iter().take(LIST_LIMIT) {
        println!(
            "{} ({}) {} memories, related: {}",
            concept.name,
            concept.concept_type,
            concept.linked_memories.len(),
            concept.related.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }
}

fn parse_kind(name: &str) -> Option<MemoryKind> {
    let kind = MemoryKind::from_str(name);
    if kind.is_none() {
        println!(
            "Unknown memory type '{}', use episodic, non_episodic or conversation",
            name
        );
    }
    kind
}

async fn print_status(manager: &MemoryManager, llm: &LlmService) {
    let providers = llm.providers();
    if providers.is_empty() {
        println!("LLM: no providers configured");
    } else {
        let state = if llm.is_available().await {
            "available"
        } else {
            "unavailable"
        };
        println!("LLM: {} ({})", state, providers.join(", "));
    }
    if let Some((message, count)) = llm.get_error_info().await {
        println!("Last LLM error ({} consecutive): {}", count, message);
    }

    match manager.status().await {
        Ok(status) => println!(
            "Memories: {} episodic, {} non-episodic, {} conversations, {} concepts",
            status.episodic, status.non_episodic, status.conversations, status.concepts
        ),
        Err(e) => println!("Could not read memory status: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    let llm = LlmService::new(&config.llm)?;
    if llm.providers().is_empty() {
        tracing::warn!(
            "No LLM providers configured, set ANTHROPIC_API_KEY or another provider key"
        );
    }
    tracing::info!(
        root = %config.memory.root.display(),
        providers = ?llm.providers(),
        "Starting remind"
    );

    let manager = MemoryManager::new(&config, Arc::new(llm.clone()));
    let mut conversation_id: Option<String> = None;

    println!(
        "remind: type a message, or /new /memories /search /delete /hooks /tags \
         /concepts /graph /merge /status /quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Chat("") => {}
            Command::Chat(message) => {
                match manager.handle_turn(conversation_id.as_deref(), message).await {
                    Ok(outcome) => {
                        if outcome.new_conversation {
                            println!("(conversation {})", outcome.conversation_id);
                        }
                        println!("{}", outcome.assistant_reply);
                        conversation_id = Some(outcome.conversation_id);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::New => {
                conversation_id = None;
                println!("Started a new conversation.");
            }
            Command::Memories(kind) => {
                let kind = match kind {
                    None => MemoryKind::NonEpisodic,
                    Some(name) => match parse_kind(name) {
                        Some(kind) => kind,
                        None => continue,
                    },
                };
                let filter = MemoryFilter {
                    limit: Some(LIST_LIMIT),
                    ..MemoryFilter::default()
                };
                match manager.list_memories(kind, &filter).await {
                    Ok(records) => print_records(&records),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Search("") => println!("Usage: /search <query>"),
            Command::Search(query) => match manager.search(query, None).await {
                Ok(records) => print_records(&records),
                Err(e) => println!("Error: {}", e),
            },
            Command::Delete("") => println!("Usage: /delete <conversation id>"),
            Command::Delete(id) => match manager.delete_conversation(id).await {
                Ok(deletion) => {
                    println!(
                        "Deleted {} and {} episodic memories.",
                        deletion.conversation_id,
                        deletion.removed_memories.len()
                    );
                    if conversation_id.as_deref() == Some(id) {
                        conversation_id = None;
                    }
                }
                Err(e) => println!("Error: {}", e),
            },
            Command::Hooks(kind) => {
                let scope = match kind {
                    None => None,
                    Some(name) => match parse_kind(name) {
                        Some(kind) => Some(kind),
                        None => continue,
                    },
                };
                match manager.list_hooks(scope).await {
                    Ok(counts) => print_counts(&counts),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Tags => match manager.list_tags(None).await {
                Ok(counts) => print_counts(&counts),
                Err(e) => println!("Error: {}", e),
            },
            Command::Concepts(query) => {
                let concepts = match query {
                    Some(query) => manager.search_concepts(query).await,
                    None => manager.list_concepts().await,
                };
                match concepts {
                    Ok(concepts) => print_concepts(&concepts),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Graph => match manager.concept_graph().await {
                Ok(graph) => {
                    println!("{} concepts, {} edges", graph.nodes.len(), graph.edges.len());
                    for edge in graph.edges.iter().take(LIST_LIMIT) {
                        println!("{} -[{}]-> {}", edge.source, edge.relationship, edge.target);
                    }
                }
                Err(e) => println!("Error: {}", e),
            },
            Command::Merge(primary, secondary) if primary.is_empty() || secondary.is_empty() => {
                println!("Usage: /merge <primary concept>, <concept to fold in>")
            }
            Command::Merge(primary, secondary) => {
                match manager.merge_concepts(primary, secondary).await {
                    Ok(concept) => println!(
                        "Merged {} into {} ({} memories)",
                        secondary,
                        concept.name,
                        concept.linked_memories.len()
                    ),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Status => print_status(&manager, &llm).await,
            Command::Quit => break,
            Command::Unknown(name) => println!("Unknown command /{}", name),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/new"), Command::New);
        assert_eq!(Command::parse("/memories"), Command::Memories(None));
        assert_eq!(
            Command::parse("/memories episodic"),
            Command::Memories(Some("episodic"))
        );
        assert_eq!(
            Command::parse("/search  favorite color "),
            Command::Search("favorite color")
        );
        assert_eq!(Command::parse("/delete abc"), Command::Delete("abc"));
        assert_eq!(Command::parse("/hooks"), Command::Hooks(None));
        assert_eq!(Command::parse("/hooks episodic"), Command::Hooks(Some("episodic")));
        assert_eq!(Command::parse("/concepts blue"), Command::Concepts(Some("blue")));
        assert_eq!(
            Command::parse("/merge cat , kitty cat"),
            Command::Merge("cat", "kitty cat")
        );
        assert_eq!(Command::parse("/merge cat"), Command::Merge("cat", ""));
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/dance"), Command::Unknown("dance"));
        assert_eq!(Command::parse("  hello  "), Command::Chat("hello"));
    }
}
