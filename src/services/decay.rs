//! Recency decay for retrieval scoring.
//!
//! A memory's recency weight halves every `half_life_days`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

/// Default half-life in days for memory decay.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Recency weight in (0, 1] of a memory created at `created_at`.
///
/// Future timestamps count as brand new.
pub fn recency(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let half_life = if half_life_days > 0.0 {
        half_life_days
    } else {
        DEFAULT_HALF_LIFE_DAYS
    };

    let seconds = now.signed_duration_since(created_at).num_seconds() as f64;
    let days_elapsed = (seconds / 86_400.0).max(0.0);
    0.5_f64.powf(days_elapsed / half_life)
}

/// A scored retrieval candidate.
#[derive(Debug, Clone)]
pub struct ScoredResult<T> {
    pub item: T,
    pub overlap: usize,
    pub substring_hit: bool,
    pub recency: f64,
    pub score: f64,
}

/// Sort by score descending, then newest first, then by `key` ascending.
pub fn rank_by_score<T, K, F>(results: &mut [ScoredResult<T>], created_at: F, key: K)
where
    F: Fn(&T) -> DateTime<Utc>,
    K: Fn(&T) -> &str,
{
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| created_at(&b.item).cmp(&created_at(&a.item)))
            .then_with(|| key(&a.item).cmp(key(&b.item)))
    });
}
