//! C4 — Workload Analyzer.
//!
//! Single writer per request-completion event, many readers (C5 consults
//! the published snapshot). Grounded on the teacher's single-mutex rolling
//! buffer pattern (`WhisperEngine`'s internal stats), generalized to the
//! complexity/concurrency/latency trio spec.md §4.4 asks for.

pub mod complexity;

use complexity::ComplexityCache;
use std::collections::VecDeque;
use std::sync::Mutex;

const RECENT_LATENCIES_CAPACITY: usize = 1000;
const HOURLY_HISTOGRAM_SLOTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTrend {
    Improving,
    Stable,
    Degrading,
}

/// Rolling workload signals, read by C5 (Memory Arena Manager) and C9.
#[derive(Debug, Clone)]
pub struct WorkloadProfile {
    pub avg_concurrency: f64,
    pub avg_text_len: f64,
    pub avg_complexity: f64,
    pub peak_concurrency: u32,
    pub avg_latency_ms: f64,
    pub recent_latencies: Vec<f64>,
    pub sample_count: u64,
}

impl Default for WorkloadProfile {
    fn default() -> Self {
        Self {
            avg_concurrency: 0.0,
            avg_text_len: 0.0,
            avg_complexity: 0.0,
            peak_concurrency: 0,
            avg_latency_ms: 0.0,
            recent_latencies: Vec::new(),
            sample_count: 0,
        }
    }
}

struct Inner {
    recent_latencies: VecDeque<f64>,
    recent_text_lens: VecDeque<f64>,
    recent_concurrency: VecDeque<u32>,
    complexity_sum: f64,
    complexity_count: u64,
    hourly_histogram: [u64; HOURLY_HISTOGRAM_SLOTS],
    cache: ComplexityCache,
}

impl Inner {
    fn new() -> Self {
        Self {
            recent_latencies: VecDeque::with_capacity(RECENT_LATENCIES_CAPACITY),
            recent_text_lens: VecDeque::with_capacity(RECENT_LATENCIES_CAPACITY),
            recent_concurrency: VecDeque::with_capacity(RECENT_LATENCIES_CAPACITY),
            complexity_sum: 0.0,
            complexity_count: 0,
            hourly_histogram: [0; HOURLY_HISTOGRAM_SLOTS],
            cache: ComplexityCache::new(),
        }
    }

    fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
        if queue.len() >= RECENT_LATENCIES_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(value);
    }
}

/// One request-completion observation fed to the analyzer.
pub struct RequestObservation<'a> {
    pub text: &'a str,
    pub in_flight_concurrency: u32,
    pub latency_ms: f64,
    pub hour_of_day: u8,
}

/// Thread-safe workload analyzer: single mutex, updated only on request
/// completion, matching the teacher's "update off the hot synthesize path"
/// discipline.
pub struct WorkloadAnalyzer {
    inner: Mutex<Inner>,
}

impl Default for WorkloadAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadAnalyzer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Score (and cache) the complexity of `text`.
    pub fn complexity(&self, text: &str) -> f64 {
        let mut inner = self.inner.lock().expect("workload analyzer mutex poisoned");
        inner.cache.complexity(text)
    }

    /// Record a completed request. Cheap, O(1) amortized.
    pub fn observe(&self, obs: RequestObservation<'_>) {
        let complexity = self.complexity(obs.text);
        let mut inner = self.inner.lock().expect("workload analyzer mutex poisoned");

        Inner::push_bounded(&mut inner.recent_latencies, obs.latency_ms);
        Inner::push_bounded(&mut inner.recent_text_lens, obs.text.chars().count() as f64);
        Inner::push_bounded(&mut inner.recent_concurrency, obs.in_flight_concurrency);
        inner.complexity_sum += complexity;
        inner.complexity_count += 1;

        let slot = (obs.hour_of_day as usize) % HOURLY_HISTOGRAM_SLOTS;
        inner.hourly_histogram[slot] += 1;
    }

    /// Snapshot the current rolling profile.
    pub fn profile(&self) -> WorkloadProfile {
        let inner = self.inner.lock().expect("workload analyzer mutex poisoned");
        let n_latency = inner.recent_latencies.len().max(1) as f64;
        let n_text = inner.recent_text_lens.len().max(1) as f64;
        let n_conc = inner.recent_concurrency.len().max(1) as f64;

        WorkloadProfile {
            avg_concurrency: inner.recent_concurrency.iter().map(|&c| c as f64).sum::<f64>() / n_conc,
            avg_text_len: inner.recent_text_lens.iter().sum::<f64>() / n_text,
            avg_complexity: if inner.complexity_count == 0 {
                0.0
            } else {
                inner.complexity_sum / inner.complexity_count as f64
            },
            peak_concurrency: inner.recent_concurrency.iter().copied().max().unwrap_or(0),
            avg_latency_ms: inner.recent_latencies.iter().sum::<f64>() / n_latency,
            recent_latencies: inner.recent_latencies.iter().copied().collect(),
            sample_count: inner.complexity_count,
        }
    }

    /// Compare the mean of the oldest half of the latency window against the
    /// newest half: >+5% degrading, <-5% improving, else stable (spec.md
    /// §4.4).
    pub fn performance_trend(&self) -> PerformanceTrend {
        let inner = self.inner.lock().expect("workload analyzer mutex poisoned");
        let samples: Vec<f64> = inner.recent_latencies.iter().copied().collect();
        if samples.len() < 4 {
            return PerformanceTrend::Stable;
        }
        let half = samples.len() / 2;
        let older_mean = samples[..half].iter().sum::<f64>() / half as f64;
        let newer_mean = samples[half..].iter().sum::<f64>() / (samples.len() - half) as f64;
        if older_mean <= 0.0 {
            return PerformanceTrend::Stable;
        }
        let delta = (newer_mean - older_mean) / older_mean;
        if delta > 0.05 {
            PerformanceTrend::Degrading
        } else if delta < -0.05 {
            PerformanceTrend::Improving
        } else {
            PerformanceTrend::Stable
        }
    }

    pub fn hourly_histogram(&self) -> [u64; HOURLY_HISTOGRAM_SLOTS] {
        self.inner.lock().expect("workload analyzer mutex poisoned").hourly_histogram
    }

    /// Drop the cached complexity scores. Used by `/performance/clear_cache`.
    pub fn clear_complexity_cache(&self) {
        self.inner.lock().expect("workload analyzer mutex poisoned").cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_latency(analyzer: &WorkloadAnalyzer, latency_ms: f64) {
        analyzer.observe(RequestObservation {
            text: "hello world",
            in_flight_concurrency: 1,
            latency_ms,
            hour_of_day: 12,
        });
    }

    #[test]
    fn profile_starts_empty() {
        let analyzer = WorkloadAnalyzer::new();
        let profile = analyzer.profile();
        assert_eq!(profile.sample_count, 0);
    }

    #[test]
    fn degrading_trend_detected() {
        let analyzer = WorkloadAnalyzer::new();
        for _ in 0..4 {
            observe_latency(&analyzer, 100.0);
        }
        for _ in 0..4 {
            observe_latency(&analyzer, 200.0);
        }
        assert_eq!(analyzer.performance_trend(), PerformanceTrend::Degrading);
    }

    #[test]
    fn improving_trend_detected() {
        let analyzer = WorkloadAnalyzer::new();
        for _ in 0..4 {
            observe_latency(&analyzer, 200.0);
        }
        for _ in 0..4 {
            observe_latency(&analyzer, 100.0);
        }
        assert_eq!(analyzer.performance_trend(), PerformanceTrend::Improving);
    }

    #[test]
    fn hourly_histogram_buckets_by_hour() {
        let analyzer = WorkloadAnalyzer::new();
        analyzer.observe(RequestObservation {
            text: "hi",
            in_flight_concurrency: 1,
            latency_ms: 50.0,
            hour_of_day: 5,
        });
        assert_eq!(analyzer.hourly_histogram()[5], 1);
    }
}
