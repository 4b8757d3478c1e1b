//! C7 — Pipeline Warmer.
//!
//! Runs once after fast-init returns control: pre-compiles graphs over fixed
//! phoneme-length buckets, pre-populates a common-pattern cache, and probes
//! Scheduler routing for each complexity bucket. Grounded on
//! `original_source/api/model/startup_profiler.py`'s `step_timer` pattern
//! for structured phase timing, generalized from one-shot startup profiling
//! to a repeatable, reset-able warm-up report.

use crate::provider::session::{Session, SynthesizeRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed phoneme-length buckets used to force graph specialization (spec.md
/// §4.7: short, medium, long, max).
const SHAPE_BUCKETS: [(&str, usize); 4] = [("short", 16), ("medium", 64), ("long", 256), ("max", 512)];

/// A small corpus of common short/medium texts, exercised against a small
/// set of voices end-to-end.
const COMMON_PATTERNS: [&str; 4] = [
    "Hello, how can I help you today?",
    "Your order has been confirmed.",
    "Please hold while we connect you.",
    "Thank you for calling, have a great day.",
];
const COMMON_VOICES: [&str; 2] = ["af_heart", "am_adam"];

/// Complexity buckets matching the Scheduler's own routing thresholds, used
/// to probe each role and measure a utilization baseline.
const COMPLEXITY_PROBES: [f64; 3] = [0.1, 0.5, 0.9];

#[derive(Debug, Default, Clone)]
pub struct WarmUpReport {
    pub graphs_compiled: u32,
    pub patterns_cached: u32,
    pub routing_samples: u32,
    pub durations: Vec<(String, Duration)>,
    pub errors: Vec<String>,
}

fn synthetic_text_of_length(chars: usize) -> String {
    "la ".repeat(chars / 3 + 1).chars().take(chars.max(1)).collect()
}

/// Run the full warm-up sequence against one session, returning a report.
/// Warm-up errors are logged and recorded but never fatal: the caller sets
/// `warmUpComplete=true` regardless.
pub async fn warm_up(session: &Arc<dyn Session>) -> WarmUpReport {
    let mut report = WarmUpReport::default();

    for (label, phoneme_len) in SHAPE_BUCKETS {
        let started = Instant::now();
        let req = SynthesizeRequest {
            text: synthetic_text_of_length(phoneme_len),
            voice: COMMON_VOICES[0].to_string(),
            speed: 1.0,
            lang: "en-us".to_string(),
        };
        match session.synthesize(&req).await {
            Ok(_) => {
                report.graphs_compiled += 1;
                report.durations.push((format!("shape:{label}"), started.elapsed()));
            }
            Err(e) => {
                tracing::warn!(bucket = label, error = %e, "shape warm-up call failed");
                report.errors.push(format!("shape:{label}: {e}"));
            }
        }
    }

    for text in COMMON_PATTERNS {
        for voice in COMMON_VOICES {
            let started = Instant::now();
            let req = SynthesizeRequest {
                text: text.to_string(),
                voice: voice.to_string(),
                speed: 1.0,
                lang: "en-us".to_string(),
            };
            match session.synthesize(&req).await {
                Ok(_) => {
                    report.patterns_cached += 1;
                    report.durations.push(("pattern".to_string(), started.elapsed()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pattern warm-up call failed");
                    report.errors.push(format!("pattern: {e}"));
                }
            }
        }
    }

    for complexity in COMPLEXITY_PROBES {
        let started = Instant::now();
        let req = SynthesizeRequest {
            text: synthetic_text_of_length((complexity * 400.0) as usize + 1),
            voice: COMMON_VOICES[0].to_string(),
            speed: 1.0,
            lang: "en-us".to_string(),
        };
        match session.synthesize(&req).await {
            Ok(_) => {
                report.routing_samples += 1;
                report
                    .durations
                    .push((format!("routing:{complexity}"), started.elapsed()));
            }
            Err(e) => {
                tracing::warn!(complexity, error = %e, "routing probe call failed");
                report.errors.push(format!("routing:{complexity}: {e}"));
            }
        }
    }

    report
}

/// Tracks whether warm-up has completed and allows a forced re-warm after a
/// hot-swap replaces the active provider.
#[derive(Default)]
pub struct WarmUpState {
    complete: std::sync::atomic::AtomicBool,
}

impl WarmUpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Reset warm-up state for re-warm after a hot-swap (spec.md §4.7,
    /// `resetWarmUp()`).
    pub fn reset_warm_up(&self) {
        self.complete.store(false, std::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::session::StubSession;
    use crate::provider::ProviderId;

    #[tokio::test]
    async fn warm_up_populates_all_three_counters() {
        let session: Arc<dyn Session> = Arc::new(StubSession::new(ProviderId::cpu()));
        let report = warm_up(&session).await;
        assert_eq!(report.graphs_compiled, SHAPE_BUCKETS.len() as u32);
        assert_eq!(
            report.patterns_cached,
            (COMMON_PATTERNS.len() * COMMON_VOICES.len()) as u32
        );
        assert_eq!(report.routing_samples, COMPLEXITY_PROBES.len() as u32);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn warm_up_errors_are_recorded_not_fatal() {
        let mut failing = StubSession::new(ProviderId::cpu());
        failing.fail_transiently = true;
        let session: Arc<dyn Session> = Arc::new(failing);
        let report = warm_up(&session).await;
        assert_eq!(report.graphs_compiled, 0);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn reset_warm_up_clears_completion_flag() {
        let state = WarmUpState::new();
        state.mark_complete();
        assert!(state.is_complete());
        state.reset_warm_up();
        assert!(!state.is_complete());
    }
}
