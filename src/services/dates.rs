//! Date references in free text.
//!
//! Extraction is purely local (regex). Matching resolves a filter such as
//! `yesterday`, `last week`, `2024-03-01` or `march 2024` against a record
//! timestamp. All calendar arithmetic is done in UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december";

static EXPLICIT_DATES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{1,2}/\d{1,2}/\d{4}\b".to_string(),
        r"\b\d{4}-\d{2}-\d{2}\b".to_string(),
        format!(r"(?i)\b(?:{})\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b", MONTHS),
        format!(r"(?i)\b\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{})\s+\d{{4}}\b", MONTHS),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid date pattern"))
    .collect()
});

static RELATIVE_DATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:today|yesterday|tomorrow|(?:last|next|this)\s+(?:week|month|year)|\d+\s+(?:days?|weeks?|months?)\s+ago|in\s+\d+\s+(?:days?|weeks?))\b",
    )
    .expect("valid relative date pattern")
});

static MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)\s+(\d{4})$").expect("valid month-year pattern"));

/// Date expressions in `text`, in order of appearance, without duplicates.
pub fn extract_dates(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = EXPLICIT_DATES
        .iter()
        .chain(std::iter::once(&*RELATIVE_DATES))
        .flat_map(|re| re.find_iter(text))
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect();

    found.sort_by_key(|(start, _)| *start);

    let mut dates: Vec<String> = Vec::with_capacity(found.len());
    for (_, date) in found {
        if !dates.iter().any(|d| d.eq_ignore_ascii_case(&date)) {
            dates.push(date);
        }
    }
    dates
}

/// Month number for a full or three-letter English month name.
pub fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    MONTHS
        .split('|')
        .position(|month| month == name || (name.len() == 3 && month.starts_with(&name)))
        .map(|i| i as u32 + 1)
}

/// Parse one of the explicit formats into a calendar date.
pub fn parse_explicit_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%m/%d/%Y") {
        return Some(date);
    }

    // "March 5, 2024" / "5th March 2024"
    let cleaned = text.replace(',', " ");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    let strip_ordinal = |s: &str| {
        s.trim_end_matches(|c: char| c.is_ascii_alphabetic())
            .parse::<u32>()
            .ok()
    };
    let year: i32 = parts[2].parse().ok()?;

    if let Some(month) = month_number(parts[0]) {
        let day = strip_ordinal(parts[1])?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(month) = month_number(parts[1]) {
        let day = strip_ordinal(parts[0])?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

/// Whether `timestamp` falls within the period described by `filter`.
///
/// Supported filters: `today`, `yesterday`, `this week`, `last week`,
/// `this month`, `last month`, any explicit date format, `<month> <year>`.
/// Anything else is matched as a substring of the timestamp rendered as
/// `march 05, 2024`, `05 march 2024` and `2024-03-05`.
pub fn matches_date_filter(timestamp: DateTime<Utc>, filter: &str, now: DateTime<Utc>) -> bool {
    let filter = filter.trim().to_lowercase();
    let date = timestamp.date_naive();
    let today = now.date_naive();

    match filter.as_str() {
        "today" => return date == today,
        "yesterday" => return date == today - Duration::days(1),
        "this week" => {
            let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            return start <= date && date <= today;
        }
        "last week" => {
            let end = today - Duration::days(today.weekday().num_days_from_monday() as i64 + 1);
            let start = end - Duration::days(6);
            return start <= date && date <= end;
        }
        "this month" => return date.year() == today.year() && date.month() == today.month(),
        "last month" => {
            let (year, month) = if today.month() == 1 {
                (today.year() - 1, 12)
            } else {
                (today.year(), today.month() - 1)
            };
            return date.year() == year && date.month() == month;
        }
        _ => {}
    }

    if let Some(explicit) = parse_explicit_date(&filter) {
        return date == explicit;
    }

    if let Some(caps) = MONTH_YEAR.captures(&filter) {
        if let (Some(month), Ok(year)) = (month_number(&caps[1]), caps[2].parse::<i32>()) {
            return date.month() == month && date.year() == year;
        }
    }

    let renderings = [
        timestamp.format("%B %d, %Y").to_string().to_lowercase(),
        timestamp.format("%d %B %Y").to_string().to_lowercase(),
        timestamp.format("%Y-%m-%d").to_string(),
    ];
    renderings.iter().any(|r| r.contains(&filter))
}

/// First date reference in `text` usable as a filter, if any.
///
/// Open-ended references such as `3 days ago` are not filters and are
/// skipped.
pub fn date_filter_from_query(text: &str) -> Option<String> {
    extract_dates(text).into_iter().find_map(|date| {
        let lower = date.to_lowercase();
        let relative = [
            "today",
            "yesterday",
            "this week",
            "last week",
            "this month",
            "last month",
        ];
        if relative.contains(&lower.as_str()) || parse_explicit_date(&lower).is_some() {
            Some(lower)
        } else {
            None
        }
    })
}
