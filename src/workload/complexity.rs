//! Text complexity scoring, cached by text hash.
//!
//! Grounded on `original_source/api/model/pipeline/complexity_analyzer.py`
//! for the overall "bounded cache of normalized sub-scores" shape; the exact
//! weights below are spec.md §3's, not the original's.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

/// Cache capacity before FIFO eviction kicks in (spec.md §3: "e.g., 10k
/// entries").
const CACHE_CAPACITY: usize = 10_000;

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Length factor: 0 at empty, saturating toward 0.3 around ~400 chars.
fn length_factor(text: &str) -> f64 {
    let len = text.chars().count() as f64;
    (len / 400.0).min(1.0) * 0.3
}

/// Character diversity: unique alphabetic chars / total chars, scaled.
fn diversity_factor(text: &str) -> f64 {
    let chars: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let mut unique: Vec<char> = chars.iter().map(|c| c.to_ascii_lowercase()).collect();
    unique.sort_unstable();
    unique.dedup();
    let ratio = unique.len() as f64 / chars.len() as f64;
    ratio.min(1.0) * 0.25
}

/// Punctuation/special-character density.
fn punctuation_factor(text: &str) -> f64 {
    let len = text.chars().count().max(1) as f64;
    let specials = text
        .chars()
        .filter(|c| c.is_ascii_punctuation() && !c.is_alphanumeric())
        .count() as f64;
    (specials / len * 4.0).min(1.0) * 0.2
}

/// Digit density.
fn digit_factor(text: &str) -> f64 {
    let len = text.chars().count().max(1) as f64;
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count() as f64;
    (digits / len * 3.0).min(1.0) * 0.15
}

/// Mean sentence length (in words), normalized.
fn sentence_length_factor(text: &str) -> f64 {
    let sentences: Vec<&str> = text
        .split(|c| c == '.' || c == '!' || c == '?')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }
    let mean_words = sentences
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .sum::<f64>()
        / sentences.len() as f64;
    (mean_words / 25.0).min(1.0) * 0.1
}

/// Compute the raw complexity score in `[0, 1]` for `text`, uncached.
pub fn score_text(text: &str) -> f64 {
    let score = length_factor(text)
        + diversity_factor(text)
        + punctuation_factor(text)
        + digit_factor(text)
        + sentence_length_factor(text);
    score.clamp(0.0, 1.0)
}

/// FIFO-evicted cache of complexity scores keyed by text hash. Single owner;
/// callers serialize access the way the Workload Analyzer serializes all its
/// post-request updates.
#[derive(Default)]
pub struct ComplexityCache {
    scores: HashMap<u64, f64>,
    order: VecDeque<u64>,
}

impl ComplexityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached score for `text`, computing and inserting it if
    /// absent. Evicts the oldest entry when the cache is at capacity.
    pub fn complexity(&mut self, text: &str) -> f64 {
        let key = hash_text(text);
        if let Some(&score) = self.scores.get(&key) {
            return score;
        }

        let score = score_text(text);
        if self.order.len() >= CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.scores.remove(&oldest);
            }
        }
        self.scores.insert(key, score);
        self.order.push_back(key);
        score
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Drop all cached scores. Used by `/performance/clear_cache`.
    pub fn clear(&mut self) {
        self.scores.clear();
        self.order.clear();
    }
}
