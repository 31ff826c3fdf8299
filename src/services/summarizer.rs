//! Rule-based summaries and titles. No LLM calls.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum summary length in characters.
pub const DEFAULT_SUMMARY_LEN: usize = 200;

/// Maximum conversation title length in characters.
pub const TITLE_LEN: usize = 50;

static USER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^User:\s+(.+)$").expect("valid transcript pattern"));

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("valid sentence pattern"));

/// Topic name and the phrases in user messages that signal it.
const TOPICS: &[(&str, &[&str])] = &[
    ("personal information", &["my name", "i am", "about me", "myself"]),
    ("technology", &["computer", "software", "code", "program", "app"]),
    ("health", &["health", "medical", "doctor", "sick", "illness"]),
    ("food", &["food", "eat", "cook", "recipe", "restaurant"]),
    ("travel", &["travel", "trip", "vacation", "visit", "country"]),
    ("work", &["job", "work", "career", "employer", "company"]),
];

/// Summarize `text` to at most `max_len` characters.
///
/// Short text is returned unchanged. Transcripts (`User: ...` lines) become
/// "Conversation about <topics>" when a known topic is detected. Otherwise
/// whole leading sentences are kept, falling back to truncation.
pub fn summarize(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    if let Some(summary) = transcript_summary(text) {
        if summary.chars().count() <= max_len {
            return summary;
        }
    }

    first_sentences(text, max_len)
}

fn transcript_summary(text: &str) -> Option<String> {
    let mut topics: Vec<&str> = Vec::new();

    for caps in USER_LINE.captures_iter(text) {
        let message = caps[1].to_lowercase();
        for (topic, phrases) in TOPICS {
            if !topics.contains(topic) && phrases.iter().any(|p| message.contains(p)) {
                topics.push(topic);
            }
        }
    }

    if topics.is_empty() {
        None
    } else {
        Some(format!("Conversation about {}", topics.join(", ")))
    }
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // Keep the punctuation, drop the whitespace
        out.push(text[start..m.start() + 1].trim());
        start = m.end();
    }
    if start < text.len() {
        out.push(text[start..].trim());
    }
    out.retain(|s| !s.is_empty());
    out
}

fn first_sentences(text: &str, max_len: usize) -> String {
    let mut summary = String::new();

    for sentence in sentences(text) {
        let needed = summary.chars().count()
            + sentence.chars().count()
            + usize::from(!summary.is_empty());
        if needed > max_len {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
    }

    if summary.is_empty() {
        truncate_with_ellipsis(text, max_len)
    } else {
        summary
    }
}

/// Truncate to `max_len` characters, ending in "..." when shortened.
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Conversation title from its first user message.
pub fn title_from(message: &str) -> String {
    let line = message.lines().next().unwrap_or("").trim();
    line.chars().take(TITLE_LEN).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(summarize("Hello there.", 200), "Hello there.");
        assert_eq!(summarize("   ", 200), "");
    }

    #[test]
    fn test_transcript_topics() {
        let transcript = format!(
            "User: I want to cook a new recipe tonight\nAssistant: {}\nUser: Also planning a trip to Spain\nAssistant: Nice",
            "Sure, ".repeat(60)
        );
        let summary = summarize(&transcript, 200);
        assert_eq!(summary, "Conversation about food, travel");
    }

    #[test]
    fn test_first_sentences() {
        let text = format!(
            "First sentence here. Second one follows! {}",
            "Third is very long ".repeat(20)
        );
        assert_eq!(
            summarize(&text, 45),
            "First sentence here. Second one follows!"
        );
    }

    #[test]
    fn test_truncation_fallback() {
        let text = "a".repeat(300);
        let summary = summarize(&text, 50);
        assert_eq!(summary.chars().count(), 50);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_multibyte_truncation() {
        let text = "é".repeat(10);
        assert_eq!(truncate_with_ellipsis(&text, 5), "éé...");
    }

    #[test]
    fn test_title() {
        let long = "x".repeat(80);
        assert_eq!(title_from(&long).chars().count(), TITLE_LEN);
        assert_eq!(title_from("My favorite color is blue"), "My favorite color is blue");
        assert_eq!(title_from("first line\nsecond line"), "first line");
    }
}
