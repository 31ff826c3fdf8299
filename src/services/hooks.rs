//! Hook generation.
//!
//! Hooks are short lowercase tags used to index memories. Candidates come
//! from, in priority order: LLM keywords, LLM themes, explicit entities in
//! the text (dates, numbers, capitalised names) and local word/phrase
//! frequency. The result is bounded in count and per-hook length.

use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::HookConfig;

use super::dates::extract_dates;
use super::metadata::{Metadata, MetadataExtractor};

/// Common words never used as frequency hooks.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself",
    "just", "know", "like", "me", "more", "most", "my", "myself", "no", "nor", "not", "now",
    "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out",
    "over", "own", "please", "same", "she", "should", "so", "some", "such", "tell", "than",
    "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your", "yours", "yourself", "yourselves",
];

/// Frequency hooks taken from a text before bounding.
const MAX_WORD_HOOKS: usize = 10;
const MAX_PHRASE_HOOKS: usize = 5;
const MAX_NAME_HOOKS: usize = 5;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:[.,]\d+)?\b").expect("valid number pattern"));

static CAPITALISED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]{2,}\b").expect("valid name pattern"));

/// Category tags and the words that signal them.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("personal", &["my", "i am", "i'm", "my name", "myself", "i have", "i've"]),
    ("question", &["what", "how", "why", "when", "where", "who", "can you", "could you"]),
    (
        "preference",
        &["like", "prefer", "favorite", "favourite", "enjoy", "love", "hate", "dislike"],
    ),
    ("food", &["eat", "food", "dish", "meal", "recipe", "cook", "bake", "restaurant"]),
    (
        "technology",
        &["computer", "software", "hardware", "app", "device", "phone", "laptop", "code"],
    ),
    ("opinion", &["think", "believe", "opinion", "perspective", "view", "consider"]),
    ("place", &["city", "country", "location", "visit", "travel", "place", "region", "area"]),
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercase, collapse whitespace, strip punctuation at both ends.
pub fn normalize_hook(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Lowercased words with punctuation other than `-` and `'` removed.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|w| w.trim_matches(|c: char| c == '-' || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Most frequent items, ties broken by first appearance.
fn top_by_frequency(items: Vec<String>, limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, item) in items.iter().enumerate() {
        counts.entry(item.as_str()).or_insert((0, position)).0 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(item, _)| item.to_string())
        .collect()
}

/// Hooks derived from the text alone: frequent content words and
/// two-word phrases of content words.
pub fn frequency_hooks(text: &str) -> Vec<String> {
    let words = words(text);

    let content: Vec<String> = words
        .iter()
        .filter(|w| w.chars().count() > 2 && !is_stopword(w))
        .cloned()
        .collect();

    let phrases: Vec<String> = words
        .windows(2)
        .filter(|pair| {
            pair.iter()
                .all(|w| w.chars().count() > 2 && !is_stopword(w))
        })
        .map(|pair| pair.join(" "))
        .collect();

    let mut hooks = top_by_frequency(content, MAX_WORD_HOOKS);
    hooks.extend(top_by_frequency(phrases, MAX_PHRASE_HOOKS));
    hooks
}

/// Dates, numbers and capitalised names found in the text.
pub fn entity_hooks(text: &str) -> Vec<String> {
    let mut hooks = extract_dates(text);
    hooks.extend(NUMBER.find_iter(text).map(|m| m.as_str().to_string()));
    hooks.extend(
        CAPITALISED
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|name| !is_stopword(name))
            .take(MAX_NAME_HOOKS),
    );
    hooks
}

/// Category tags whose signal words appear in the text.
pub fn category_tags(text: &str) -> BTreeSet<String> {
    let padded = format!(" {} ", words(text).join(" "));
    CATEGORIES
        .iter()
        .filter(|(_, signals)| {
            signals
                .iter()
                .any(|signal| padded.contains(&format!(" {} ", signal)))
        })
        .map(|(category, _)| category.to_string())
        .collect()
}

/// Normalise, length-filter and deduplicate candidates in order, keeping at
/// most `max_hooks`.
pub fn bound_hooks<I, S>(candidates: I, max_hooks: usize, bounds: &HookConfig) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();

    for candidate in candidates {
        if kept.len() >= max_hooks {
            break;
        }
        let hook = normalize_hook(candidate.as_ref());
        let len = hook.chars().count();
        if len < bounds.min_hook_len || len > bounds.max_hook_len {
            continue;
        }
        if seen.insert(hook.clone()) {
            kept.push(hook);
        }
    }

    kept.into_iter().collect()
}

/// Build hooks from text and already-extracted metadata. No LLM call.
pub fn derive_hooks(
    text: &str,
    metadata: &Metadata,
    max_hooks: usize,
    bounds: &HookConfig,
) -> BTreeSet<String> {
    let candidates = metadata
        .keywords
        .iter()
        .cloned()
        .chain(metadata.themes.iter().cloned())
        .chain(entity_hooks(text))
        .chain(frequency_hooks(text));

    bound_hooks(candidates, max_hooks, bounds)
}

/// Generates bounded hook sets, using the metadata extractor for keywords
/// and themes.
#[derive(Clone)]
pub struct HookGenerator {
    extractor: MetadataExtractor,
    bounds: HookConfig,
}

impl HookGenerator {
    pub fn new(extractor: MetadataExtractor, bounds: HookConfig) -> Self {
        Self { extractor, bounds }
    }

    /// Hooks for `text`, at most `max_hooks` (further capped by the
    /// configured maximum).
    pub async fn generate_hooks(&self, text: &str, max_hooks: usize) -> BTreeSet<String> {
        if text.trim().is_empty() {
            return BTreeSet::new();
        }
        let metadata = self.extractor.extract(text).await;
        self.derive(text, &metadata, max_hooks)
    }

    /// Hooks from metadata the caller already holds.
    pub fn derive(&self, text: &str, metadata: &Metadata, max_hooks: usize) -> BTreeSet<String> {
        derive_hooks(text, metadata, max_hooks.min(self.bounds.max_hooks), &self.bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remind_llm::testing::ScriptedLlm;
    use rstest::rstest;
    use std::sync::Arc;

    fn bounds() -> HookConfig {
        HookConfig::default()
    }

    #[rstest]
    #[case("  Favorite   Color! ", "favorite color")]
    #[case("\"Blue\"", "blue")]
    #[case("...", "")]
    #[case("C++", "c")]
    fn test_normalize_hook(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_hook(raw), expected);
    }

    #[test]
    fn test_frequency_hooks_skip_stopwords() {
        let hooks = frequency_hooks("The blue sky and the blue sea are blue.");
        assert_eq!(hooks.first().map(String::as_str), Some("blue"));
        assert!(!hooks.iter().any(|h| h == "the" || h == "and"));
        assert!(hooks.iter().any(|h| h == "blue sky"));
    }

    #[test]
    fn test_entity_hooks() {
        let hooks = entity_hooks("Alice flew to Paris on 2024-03-05 with 3 bags. What a trip");
        assert!(hooks.contains(&"2024-03-05".to_string()));
        assert!(hooks.contains(&"alice".to_string()));
        assert!(hooks.contains(&"paris".to_string()));
        assert!(hooks.contains(&"3".to_string()));
        assert!(!hooks.contains(&"what".to_string()));
    }

    #[test]
    fn test_category_tags() {
        let tags = category_tags("What is my favorite food?");
        let expected: BTreeSet<String> = ["personal", "question", "preference", "food"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tags, expected);

        assert!(category_tags("mystery novels").is_empty());
    }

    #[test]
    fn test_bounds_enforced() {
        let long = "x".repeat(31);
        let candidates = vec!["a", "ok", long.as_str(), "Ok", "fine", "good", "great"];
        let hooks = bound_hooks(candidates, 3, &bounds());
        let expected: BTreeSet<String> =
            ["ok", "fine", "good"].iter().map(|s| s.to_string()).collect();
        assert_eq!(hooks, expected);
    }

    #[test]
    fn test_derive_prefers_keywords() {
        let metadata = Metadata {
            keywords: vec!["favorite color".into(), "blue".into()],
            themes: vec!["preferences".into()],
            ..Metadata::default()
        };
        let text = "My favorite color is blue and I like painting houses with rollers";
        let hooks = derive_hooks(text, &metadata, 3, &bounds());
        let expected: BTreeSet<String> = ["favorite color", "blue", "preferences"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(hooks, expected);
    }

    #[test]
    fn test_derive_is_stable() {
        let metadata = Metadata::default();
        let text = "Planning a trip to Lisbon in June with friends from work";
        let first = derive_hooks(text, &metadata, 10, &bounds());
        let second = derive_hooks(text, &metadata, 10, &bounds());
        assert_eq!(first, second);
        assert!(first.len() <= 10);
        assert!(first.contains("lisbon"));
    }

    #[tokio::test]
    async fn test_generate_hooks_uses_llm_keywords() {
        let llm = Arc::new(ScriptedLlm::new().otherwise(
            r#"{"keywords": ["Sourdough", "baking"], "themes": ["cooking"]}"#,
        ));
        let generator = HookGenerator::new(MetadataExtractor::new(llm.clone(), None), bounds());

        let hooks = generator
            .generate_hooks("I started baking sourdough every weekend", 3)
            .await;
        let expected: BTreeSet<String> = ["sourdough", "baking", "cooking"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(hooks, expected);

        assert!(generator.generate_hooks("   ", 3).await.is_empty());
        assert_eq!(llm.call_count(), 1);
    }
}
