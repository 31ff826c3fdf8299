//! Metadata extraction: keywords, themes and sentiment from the LLM, dates
//! from local pattern matching.
//!
//! The LLM reply is parsed by an ordered chain of strategies. The first
//! strategy that recognises the reply wins and its partial result is merged
//! over the defaults. Extraction never fails: an unusable reply yields empty
//! LLM-derived fields, a failed call yields the empty result.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use remind_llm::{extract_json, CompletionRequest, LanguageModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::dates::extract_dates;

/// Maximum keywords kept from a reply.
pub const MAX_KEYWORDS: usize = 10;

/// Maximum themes kept from a reply.
pub const MAX_THEMES: usize = 5;

/// Overall emotional tone of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }

    /// First sentiment word found in `s`, case-insensitive.
    pub fn from_str(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        [
            Sentiment::Positive,
            Sentiment::Negative,
            Sentiment::Neutral,
            Sentiment::Mixed,
        ]
        .into_iter()
        .filter_map(|sentiment| lower.find(sentiment.as_str()).map(|pos| (pos, sentiment)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, sentiment)| sentiment)
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub keywords: Vec<String>,
    pub dates: Vec<String>,
    pub themes: Vec<String>,
    pub sentiment: Sentiment,
}

/// Fields a parse strategy managed to recover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMetadata {
    pub keywords: Option<Vec<String>>,
    pub themes: Option<Vec<String>>,
    pub sentiment: Option<Sentiment>,
}

impl PartialMetadata {
    fn is_empty(&self) -> bool {
        self.keywords.is_none() && self.themes.is_none() && self.sentiment.is_none()
    }

    /// Fill missing fields with defaults.
    fn into_metadata(self, dates: Vec<String>) -> Metadata {
        Metadata {
            keywords: self.keywords.unwrap_or_default(),
            dates,
            themes: self.themes.unwrap_or_default(),
            sentiment: self.sentiment.unwrap_or_default(),
        }
    }
}

type ParseStrategy = fn(&str) -> Option<PartialMetadata>;

/// Tried in order; first match wins.
const PARSE_STRATEGIES: &[(&str, ParseStrategy)] = &[
    ("json_object", parse_json_object),
    ("labelled_fields", parse_labelled_fields),
];

/// Run the strategy chain over an LLM reply.
pub fn parse_reply(reply: &str) -> PartialMetadata {
    for (name, strategy) in PARSE_STRATEGIES {
        if let Some(partial) = strategy(reply) {
            debug!(strategy = *name, "Parsed metadata reply");
            return partial;
        }
    }
    debug!("No strategy recognised metadata reply");
    PartialMetadata::default()
}

fn parse_json_object(reply: &str) -> Option<PartialMetadata> {
    let json = extract_json(reply)?;
    let object = json.as_object()?;

    let partial = PartialMetadata {
        keywords: object.get("keywords").map(|v| json_list(v, MAX_KEYWORDS)),
        themes: object.get("themes").map(|v| json_list(v, MAX_THEMES)),
        sentiment: object
            .get("sentiment")
            .and_then(Value::as_str)
            .and_then(Sentiment::from_str),
    };

    (!partial.is_empty()).then_some(partial)
}

/// Accept either a JSON array of strings or a comma separated string.
fn json_list(value: &Value, max: usize) -> Vec<String> {
    match value {
        Value::Array(items) => clean_list(items.iter().filter_map(Value::as_str), max),
        Value::String(s) => clean_list(s.split(|c: char| c == ',' || c == '\n'), max),
        _ => Vec::new(),
    }
}

static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\s*#>\-\d.]*(keywords|themes|semantic themes|sentiment)\**\s*[:\-]\s*(.*)$")
        .expect("valid label pattern")
});

/// Parse `Keywords: a, b` style replies. A field's value runs until a blank
/// line or the next label.
fn parse_labelled_fields(reply: &str) -> Option<PartialMetadata> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in reply.lines() {
        if let Some(caps) = LABEL_LINE.captures(line) {
            fields.extend(current.take());
            current = Some((caps[1].to_lowercase(), caps[2].to_string()));
        } else if line.trim().is_empty() {
            fields.extend(current.take());
        } else if let Some((_, value)) = current.as_mut() {
            value.push('\n');
            value.push_str(line);
        }
    }
    fields.extend(current);

    let mut partial = PartialMetadata::default();
    for (label, value) in fields {
        match label.as_str() {
            "keywords" => partial.keywords = Some(clean_list(split_list(&value), MAX_KEYWORDS)),
            "themes" | "semantic themes" => {
                partial.themes = Some(clean_list(split_list(&value), MAX_THEMES))
            }
            "sentiment" => partial.sentiment = Sentiment::from_str(&value),
            _ => {}
        }
    }

    (!partial.is_empty()).then_some(partial)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(|c: char| c == ',' || c == '\n')
}

/// Trim list items of whitespace, bullets, quotes and brackets, drop empties
/// and case-insensitive duplicates, keep at most `max`.
fn clean_list<'a>(items: impl Iterator<Item = &'a str>, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item
            .trim()
            .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•')
            .trim_matches(|c: char| c.is_whitespace() || "\"'[]`".contains(c));
        if item.is_empty() || out.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
            continue;
        }
        out.push(item.to_string());
        if out.len() == max {
            break;
        }
    }
    out
}

/// Extracts keywords, themes, sentiment and dates from text.
#[derive(Clone)]
pub struct MetadataExtractor {
    llm: Arc<dyn LanguageModel>,
    model: Option<String>,
}

impl MetadataExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    /// Extract metadata from `text`.
    ///
    /// Blank text returns the empty shape without calling the LLM. Dates are
    /// extracted locally, never from the reply. A failed call returns the
    /// same empty shape as blank text.
    pub async fn extract(&self, text: &str) -> Metadata {
        if text.trim().is_empty() {
            return Metadata::default();
        }

        let dates = extract_dates(text);

        let prompt = format!(
            r#"Analyse the following text and extract metadata.

1. Keywords: important nouns, verbs and adjectives (max {MAX_KEYWORDS})
2. Themes: high-level topics or concepts present in the text (max {MAX_THEMES})
3. Sentiment: the overall emotional tone, one of positive, negative, neutral or mixed

Return JSON:
{{"keywords": ["..."], "themes": ["..."], "sentiment": "neutral"}}

Text:
{text}"#
        );

        let request = CompletionRequest::new(prompt)
            .model(self.model.clone())
            .max_tokens(512)
            .temperature(0.0);

        match self.llm.complete(request).await {
            Ok(completion) => parse_reply(&completion.text).into_metadata(dates),
            Err(e) => {
                warn!(error = %e, "Metadata extraction failed, using empty metadata");
                Metadata::default()
            }
        }
    }
}
