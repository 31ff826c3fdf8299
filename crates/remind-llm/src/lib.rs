//! LLM completion client.
//!
//! Supports Anthropic (Claude), OpenAI, OpenRouter and Gemini. Every vendor
//! response is reduced to a plain [`Completion`] in one place, so callers
//! never see vendor JSON.
//!
//! Callers depend on the [`LanguageModel`] trait; [`LlmService`] is the HTTP
//! implementation. With the `testing` feature a scripted in-process model is
//! available as [`testing::ScriptedLlm`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[cfg(feature = "testing")]
pub mod testing;

/// Delay before the second attempt (doubles each time)
const RETRY_DELAY_MS: u64 = 500;

/// Minimum interval between availability re-checks after repeated failures
const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Number of consecutive errors before reporting unavailable
const ERROR_THRESHOLD: u32 = 3;

/// Error types for the LLM client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("No providers configured")]
    NoProviders,

    /// Non-success HTTP status other than 429
    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider could not be reached or did not answer in time
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration for an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub priority: u8,
}

impl LlmProviderConfig {
    /// Provider with the vendor's default endpoint and model.
    pub fn with_defaults(name: &str, api_key: impl Into<String>, priority: u8) -> Self {
        Self {
            name: name.to_string(),
            base_url: default_endpoint(name),
            model: default_model(name),
            api_key: api_key.into(),
            priority,
        }
    }
}

/// Configuration for the LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub providers: Vec<LlmProviderConfig>,
    /// Attempts per provider. 1 means no retry.
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_attempts: 1,
            timeout_secs: 60,
        }
    }
}

/// Get default endpoint for a provider
pub fn default_endpoint(name: &str) -> String {
    match name {
        "gemini" => "https://generativelanguage.googleapis.com/v1beta".to_string(),
        "anthropic" => "https://api.anthropic.com/v1".to_string(),
        "openrouter" => "https://openrouter.ai/api/v1".to_string(),
        _ => "https://api.openai.com/v1".to_string(),
    }
}

/// Get default model for a provider
pub fn default_model(name: &str) -> String {
    match name {
        "gemini" => "gemini-1.5-flash".to_string(),
        "anthropic" => "claude-3-5-sonnet-20241022".to_string(),
        "openrouter" => "anthropic/claude-3.5-sonnet".to_string(),
        _ => "gpt-4o-mini".to_string(),
    }
}

/// Speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Overrides the provider's configured model when set
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Single user message with default limits.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            messages: vec![PromptMessage::user(prompt)],
            max_tokens: 1024,
            temperature: 0.3,
        }
    }

    pub fn with_messages(messages: Vec<PromptMessage>) -> Self {
        Self {
            messages,
            ..Self::new("")
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// All prompt text concatenated, system first.
    pub fn full_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            parts.push(system);
        }
        parts.extend(self.messages.iter().map(|m| m.content.as_str()));
        parts.join("\n")
    }
}

/// Completion text with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub provider: String,
    pub model: String,
}

/// Anything that can answer a completion request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// HTTP client for hosted LLM APIs.
///
/// Tries providers in priority order and falls through to the next one when
/// a provider fails.
#[derive(Clone)]
pub struct LlmService {
    inner: Arc<LlmServiceInner>,
}

struct LlmServiceInner {
    providers: Vec<LlmProviderConfig>,
    client: Client,
    max_attempts: u32,
    /// Last error message from LLM call
    last_error: RwLock<Option<String>>,
    /// Consecutive error count
    error_count: AtomicU32,
    /// When we last failed
    last_failure: RwLock<Option<Instant>>,
}

/// Response from LLM API
#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Option<Vec<Choice>>,
    candidates: Option<Vec<Candidate>>,     // Gemini format
    content: Option<Vec<AnthropicContent>>, // Anthropic format
    error: Option<LlmError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct LlmError {
    message: String,
}

impl LlmService {
    /// Create the client from config. Providers are sorted by priority.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Request(format!("Failed to create HTTP client: {}", e)))?;

        let mut providers = config.providers.clone();
        providers.sort_by_key(|p| p.priority);

        info!(
            providers = ?providers.iter().map(|p| &p.name).collect::<Vec<_>>(),
            max_attempts = config.max_attempts,
            "LLM service initialized from config"
        );

        Ok(Self {
            inner: Arc::new(LlmServiceInner {
                providers,
                client,
                max_attempts: config.max_attempts.max(1),
                last_error: RwLock::new(None),
                error_count: AtomicU32::new(0),
                last_failure: RwLock::new(None),
            }),
        })
    }

    /// Provider names in priority order
    pub fn providers(&self) -> Vec<String> {
        self.inner.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Check if the client can be expected to answer.
    /// Returns false if no providers are configured, or after repeated
    /// failures until the re-check interval has passed.
    pub async fn is_available(&self) -> bool {
        if self.inner.providers.is_empty() {
            return false;
        }

        let error_count = self.inner.error_count.load(Ordering::Relaxed);
        if error_count >= ERROR_THRESHOLD {
            let last_failure = self.inner.last_failure.read().await;
            if let Some(last) = *last_failure {
                if last.elapsed().as_secs() < HEALTH_CHECK_INTERVAL_SECS {
                    return false;
                }
            }
        }

        true
    }

    /// Last error message and consecutive failure count, if failing
    pub async fn get_error_info(&self) -> Option<(String, u32)> {
        let error = self.inner.last_error.read().await;
        error.as_ref().map(|msg| {
            let count = self.inner.error_count.load(Ordering::Relaxed);
            (msg.clone(), count)
        })
    }

    async fn record_error(&self, error: &str) {
        let mut last_error = self.inner.last_error.write().await;
        *last_error = Some(error.to_string());
        drop(last_error);

        self.inner.error_count.fetch_add(1, Ordering::Relaxed);

        let mut last_failure = self.inner.last_failure.write().await;
        *last_failure = Some(Instant::now());
    }

    async fn clear_error(&self) {
        let mut last_error = self.inner.last_error.write().await;
        *last_error = None;
        drop(last_error);

        self.inner.error_count.store(0, Ordering::Relaxed);
    }

    /// Try a specific provider, retrying retryable errors up to the
    /// configured attempt count.
    async fn try_provider(
        &self,
        provider: &LlmProviderConfig,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        let attempts = self.inner.max_attempts;
        let mut delay = Duration::from_millis(RETRY_DELAY_MS);

        for attempt in 0..attempts {
            match self.call_provider(provider, request).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt + 1 < attempts {
                        debug!(
                            provider = %provider.name,
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Retrying after error"
                        );
                        sleep(delay).await;
                        delay *= 2;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(Error::Llm(format!(
            "Provider {} failed after {} attempts",
            provider.name, attempts
        )))
    }

    /// Rate limits, 5xx responses, timeouts and refused connections are
    /// worth another attempt.
    fn is_retryable(error: &Error) -> bool {
        match error {
            Error::RateLimitExceeded | Error::Connection(_) => true,
            Error::Status { status, .. } => *status >= 500,
            Error::Llm(_) | Error::Request(_) | Error::NoProviders => false,
        }
    }

    /// Make the actual API call to a provider.
    async fn call_provider(
        &self,
        provider: &LlmProviderConfig,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| provider.model.clone());

        debug!(
            provider = %provider.name,
            model = %model,
            messages = request.messages.len(),
            "Calling LLM provider"
        );

        let (url, body) = match provider.name.as_str() {
            "gemini" => build_gemini_request(provider, &model, request),
            "anthropic" => build_anthropic_request(provider, &model, request),
            _ => build_openai_request(provider, &model, request),
        };

        let mut http = self
            .inner
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        http = match provider.name.as_str() {
            "anthropic" => http
                .header("x-api-key", &provider.api_key)
                .header("anthropic-version", "2023-06-01"),
            "gemini" => http.query(&[("key", provider.api_key.as_str())]),
            _ => http.header("Authorization", format!("Bearer {}", provider.api_key)),
        };

        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::Connection(e.to_string())
                } else {
                    Error::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(format!("Failed to read response: {}", e)))?;

        if status.as_u16() == 429 {
            return Err(Error::RateLimitExceeded);
        }

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let text = parse_response(&provider.name, &text)?;

        Ok(Completion {
            text,
            provider: provider.name.clone(),
            model,
        })
    }
}

#[async_trait]
impl LanguageModel for LlmService {
    /// Complete a request with provider fallback.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        if self.inner.providers.is_empty() {
            return Err(Error::NoProviders);
        }

        let mut last_error = None;

        for provider in &self.inner.providers {
            match self.try_provider(provider, &request).await {
                Ok(completion) => {
                    self.clear_error().await;
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(
                        provider = %provider.name,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| Error::Llm("All providers failed".to_string()));
        self.record_error(&error.to_string()).await;

        Err(error)
    }
}

/// Build request for Gemini API
fn build_gemini_request(
    provider: &LlmProviderConfig,
    model: &str,
    request: &CompletionRequest,
) -> (String, Value) {
    let url = format!("{}/models/{}:generateContent", provider.base_url, model);

    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                PromptRole::User => "user",
                PromptRole::Assistant => "model",
            };
            json!({"role": role, "parts": [{"text": m.content}]})
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": request.max_tokens,
            "temperature": request.temperature
        }
    });

    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }

    (url, body)
}

/// Build request for OpenAI-compatible APIs (OpenAI, OpenRouter)
fn build_openai_request(
    provider: &LlmProviderConfig,
    model: &str,
    request: &CompletionRequest,
) -> (String, Value) {
    let url = format!("{}/chat/completions", provider.base_url);

    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content})),
    );

    let body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature
    });

    (url, body)
}

/// Build request for Anthropic Claude API
fn build_anthropic_request(
    provider: &LlmProviderConfig,
    model: &str,
    request: &CompletionRequest,
) -> (String, Value) {
    let url = format!("{}/messages", provider.base_url);

    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature
    });

    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }

    (url, body)
}

/// Reduce any supported vendor response body to its completion text.
fn parse_response(provider: &str, text: &str) -> Result<String> {
    let response: LlmResponse = serde_json::from_str(text)
        .map_err(|e| Error::Llm(format!("Failed to parse response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(Error::Llm(error.message));
    }

    // Anthropic may interleave non-text blocks; join the text ones
    if let Some(content) = response.content {
        let text: String = content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        if !text.is_empty() {
            return Ok(text);
        }
    }

    if let Some(candidates) = response.candidates {
        if let Some(candidate) = candidates.first() {
            if let Some(part) = candidate.content.parts.first() {
                return Ok(part.text.clone());
            }
        }
    }

    if let Some(choices) = response.choices {
        if let Some(choice) = choices.first() {
            if let Some(content) = choice.message.as_ref().and_then(|m| m.content.clone()) {
                return Ok(content);
            }
            if let Some(text) = &choice.text {
                return Ok(text.clone());
            }
        }
    }

    Err(Error::Llm(format!("No content in {} response", provider)))
}

/// Extract a JSON object from LLM response text.
///
/// Looks for a ```json fence, then any fence, then the first balanced
/// `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            if let Ok(json) = serde_json::from_str(text[start..start + end].trim()) {
                return Some(json);
            }
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        // Skip language identifier if present
        let start = text[start..]
            .find('\n')
            .map(|i| start + i + 1)
            .unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            if let Ok(json) = serde_json::from_str(text[start..start + end].trim()) {
                return Some(json);
            }
        }
    }

    balanced_object(text).and_then(|span| serde_json::from_str(span).ok())
}

/// First top-level `{...}` span, skipping braces inside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json() {
        // Test JSON in code block
        let text = r#"Here's the result:
```json
{"title": "Test", "value": 42}
```"#;
        let json = extract_json(text);
        assert!(json.is_some());
        assert_eq!(json.unwrap()["title"], "Test");

        // Test raw JSON
        let text = r#"The result is {"title": "Raw", "count": 5} and more text"#;
        let json = extract_json(text);
        assert!(json.is_some());
        assert_eq!(json.unwrap()["title"], "Raw");
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"Sure: {"keywords": ["a}b"], "sentiment": "neutral"} trailing }"#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["keywords"][0], "a}b");
        assert_eq!(json["sentiment"], "neutral");
    }

    #[test]
    fn test_extract_json_none_for_prose() {
        assert!(extract_json("no structured data here").is_none());
        assert!(extract_json("{ unbalanced").is_none());
    }

    #[test]
    fn test_default_endpoints() {
        assert_eq!(
            default_endpoint("gemini"),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(
            default_endpoint("anthropic"),
            "https://api.anthropic.com/v1"
        );
        assert_eq!(default_endpoint("openai"), "https://api.openai.com/v1");
    }

    #[test]
    fn test_default_models() {
        assert_eq!(default_model("gemini"), "gemini-1.5-flash");
        assert_eq!(default_model("anthropic"), "claude-3-5-sonnet-20241022");
        assert_eq!(default_model("openai"), "gpt-4o-mini");
    }

    #[test]
    fn test_parse_response_formats() {
        let anthropic = r#"{"content":[{"type":"text","text":"hi"}]}"#;
        assert_eq!(parse_response("anthropic", anthropic).unwrap(), "hi");

        let openai = r#"{"choices":[{"message":{"content":"hello"}}]}"#;
        assert_eq!(parse_response("openai", openai).unwrap(), "hello");

        let gemini = r#"{"candidates":[{"content":{"parts":[{"text":"hey"}]}}]}"#;
        assert_eq!(parse_response("gemini", gemini).unwrap(), "hey");

        let error = r#"{"error":{"message":"bad key","type":"auth"}}"#;
        assert!(matches!(parse_response("openai", error), Err(Error::Llm(m)) if m == "bad key"));

        assert!(parse_response("openai", r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_request_bodies_carry_system_prompt() {
        let provider = LlmProviderConfig::with_defaults("anthropic", "key", 1);
        let request = CompletionRequest::new("hello").system("be brief");

        let (url, body) = build_anthropic_request(&provider, "m", &request);
        assert!(url.ends_with("/messages"));
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["content"], "hello");

        let (_, body) = build_openai_request(&provider, "m", &request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");

        let (url, body) = build_gemini_request(&provider, "m", &request);
        assert!(url.ends_with("/models/m:generateContent"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_full_text_joins_system_and_messages() {
        let request = CompletionRequest::with_messages(vec![
            PromptMessage::user("one"),
            PromptMessage::assistant("two"),
        ])
        .system("sys");
        assert_eq!(request.full_text(), "sys\none\ntwo");
    }

    #[test]
    fn test_retryable_errors() {
        let status = |status: u16| Error::Status {
            status,
            body: String::new(),
        };
        assert!(LlmService::is_retryable(&Error::RateLimitExceeded));
        assert!(LlmService::is_retryable(&Error::Connection("refused".into())));
        assert!(LlmService::is_retryable(&status(500)));
        assert!(LlmService::is_retryable(&status(504)));
        assert!(!LlmService::is_retryable(&status(400)));
        assert!(!LlmService::is_retryable(&status(404)));
        assert!(!LlmService::is_retryable(&Error::NoProviders));
        assert!(!LlmService::is_retryable(&Error::Request("bad body".into())));
        // a 503 mentioned in a parsed error message is not a status
        assert!(!LlmService::is_retryable(&Error::Llm("upstream 503".into())));
    }

    #[test]
    fn test_status_error_message() {
        let error = Error::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(error.to_string(), "Provider returned 502: bad gateway");
    }
}
