//! Configuration management for remind.
//!
//! Loads configuration from environment variables (and `.env` when present).
//! The resulting [`Config`] is built once at startup and handed to
//! constructors explicitly.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use remind_llm::{LlmConfig, LlmProviderConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub memory: MemoryConfig,
    pub hooks: HookConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Root directory holding the record collections
    pub root: PathBuf,
    pub max_episodic: usize,
    pub max_non_episodic: usize,
    /// Once the episodic collection is over capacity, records older than
    /// this are pruned before FIFO eviction; 0 disables the age rule
    pub retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct HookConfig {
    pub max_hooks: usize,
    pub min_hook_len: usize,
    pub max_hook_len: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub limit: usize,
    pub hook_weight: f64,
    pub substring_weight: f64,
    pub recency_weight: f64,
    pub half_life_days: f64,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model used for assistant replies; provider default when unset
    pub chat_model: Option<String>,
    /// Model used for extraction and classification; provider default when unset
    pub fast_model: Option<String>,
    /// Prior messages included in the reply prompt
    pub history_messages: usize,
    pub reply_max_tokens: u32,
    /// Minimum confidence for a durable fact to be stored
    pub durable_min_confidence: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./memory"),
            max_episodic: 1000,
            max_non_episodic: 500,
            retention_days: 30,
        }
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            max_hooks: 10,
            min_hook_len: 2,
            max_hook_len: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            hook_weight: 1.0,
            substring_weight: 0.5,
            recency_weight: 0.5,
            half_life_days: 30.0,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            chat_model: None,
            fast_model: None,
            history_messages: 10,
            reply_max_tokens: 1024,
            durable_min_confidence: 0.6,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            hooks: HookConfig::default(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            memory: MemoryConfig {
                root: PathBuf::from(env_or("REMIND_MEMORY_DIR", "./memory")),
                max_episodic: env_parse("MAX_EPISODIC_MEMORIES", defaults.memory.max_episodic),
                max_non_episodic: env_parse(
                    "MAX_NON_EPISODIC_MEMORIES",
                    defaults.memory.max_non_episodic,
                ),
                retention_days: env_parse("MEMORY_RETENTION_DAYS", defaults.memory.retention_days),
            },
            hooks: HookConfig {
                max_hooks: env_parse("MAX_HOOKS_PER_MEMORY", defaults.hooks.max_hooks),
                min_hook_len: env_parse("MIN_HOOK_LENGTH", defaults.hooks.min_hook_len),
                max_hook_len: env_parse("MAX_HOOK_LENGTH", defaults.hooks.max_hook_len),
            },
            retrieval: RetrievalConfig {
                limit: env_parse("MAX_MEMORIES_TO_RETRIEVE", defaults.retrieval.limit),
                ..defaults.retrieval
            },
            chat: ChatConfig {
                chat_model: env::var("REMIND_CHAT_MODEL").ok(),
                fast_model: env::var("REMIND_FAST_MODEL").ok(),
                history_messages: env_parse("HISTORY_MESSAGES", defaults.chat.history_messages),
                reply_max_tokens: env_parse("REPLY_MAX_TOKENS", defaults.chat.reply_max_tokens),
                durable_min_confidence: env_parse(
                    "DURABLE_MIN_CONFIDENCE",
                    defaults.chat.durable_min_confidence,
                ),
            },
            llm: LlmConfig {
                providers: Self::parse_llm_providers(),
                max_attempts: env_parse("LLM_MAX_ATTEMPTS", 1),
                timeout_secs: env_parse("LLM_TIMEOUT_SECS", 60),
            },
        }
    }

    /// Defaults with the memory root pointed at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.memory.root = root.into();
        config
    }

    /// Parse LLM providers from environment.
    /// Anthropic is preferred, then OpenAI, OpenRouter and Gemini.
    fn parse_llm_providers() -> Vec<LlmProviderConfig> {
        let mut providers = Vec::new();

        let candidates = [
            ("anthropic", "ANTHROPIC_API_KEY", "ANTHROPIC_MODEL", 1),
            ("openai", "OPENAI_API_KEY", "OPENAI_MODEL", 2),
            ("openrouter", "OPENROUTER_API_KEY", "OPENROUTER_MODEL", 3),
            ("gemini", "GOOGLE_API_KEY", "GEMINI_MODEL", 4),
        ];

        for (name, key_var, model_var, priority) in candidates {
            let Ok(api_key) = env::var(key_var) else {
                continue;
            };
            if api_key.trim().is_empty() {
                continue;
            }

            let mut provider = LlmProviderConfig::with_defaults(name, api_key, priority);
            if let Ok(model) = env::var(model_var) {
                provider.model = model;
            }
            providers.push(provider);
        }

        providers.sort_by_key(|p| p.priority);
        providers
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, keeping `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.memory.max_episodic, 1000);
        assert_eq!(config.memory.max_non_episodic, 500);
        assert_eq!(config.hooks.max_hooks, 10);
        assert_eq!(config.hooks.min_hook_len, 2);
        assert_eq!(config.hooks.max_hook_len, 30);
        assert_eq!(config.retrieval.limit, 5);
        assert_eq!(config.llm.max_attempts, 1);
    }

    #[test]
    fn test_with_root() {
        let config = Config::with_root("/tmp/remind-test");
        assert_eq!(config.memory.root, PathBuf::from("/tmp/remind-test"));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        env::set_var("REMIND_TEST_GARBAGE_NUMBER", "not-a-number");
        assert_eq!(env_parse("REMIND_TEST_GARBAGE_NUMBER", 7usize), 7);

        env::set_var("REMIND_TEST_GOOD_NUMBER", " 42 ");
        assert_eq!(env_parse("REMIND_TEST_GOOD_NUMBER", 7usize), 42);
    }
}
