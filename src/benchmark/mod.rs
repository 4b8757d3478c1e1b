//! C8 — Provider Benchmarker + Hot-Swap.
//!
//! Runs trial sessions against every non-active candidate provider, and
//! atomically swaps the process-wide active session if a candidate clears
//! both the improvement and success-rate bars. Grounded on the teacher's
//! `WhisperEngine` device-selection retry/fallback shape, generalized from a
//! one-shot device pick to a recurring, cooldown-gated background swap.

use crate::error::SwapError;
use crate::provider::session::{Session, SynthesizeRequest};
use crate::provider::ProviderId;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The process-wide active session, readable by every inbound request and
/// writable only by the Benchmarker's hot-swap step (spec.md §3,
/// `ActiveSessionSlot`). I1/I2: never null after first init; old session
/// stays valid until its last reference drops.
#[derive(Clone)]
pub struct ActiveSession {
    pub session: Arc<dyn Session>,
    pub provider_id: ProviderId,
    pub generation: u64,
}

pub struct ActiveSessionSlot {
    inner: ArcSwap<ActiveSession>,
}

impl ActiveSessionSlot {
    pub fn new(initial: ActiveSession) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Arc<ActiveSession> {
        self.inner.load_full()
    }

    /// Publish a new active session with a bumped generation. Callers
    /// already hold the new session and its provider id.
    pub fn publish(&self, session: Arc<dyn Session>, provider_id: ProviderId) -> u64 {
        let generation = self.load().generation + 1;
        self.inner.store(Arc::new(ActiveSession {
            session,
            provider_id,
            generation,
        }));
        generation
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkResult {
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub rtf: f64,
    pub success_rate: f64,
    pub trials: u32,
}

const TRIAL_SCRIPT: [&str; 3] = [
    "The quick brown fox jumps over the lazy dog.",
    "A short sentence.",
    "This is a somewhat longer benchmark sentence meant to exercise the model a bit more.",
];

/// Run `trials` synthesize calls over the fixed benchmark script, discard
/// the single worst outlier, and summarize latency/success rate.
pub async fn run_benchmark(session: &Arc<dyn Session>, trials: u32) -> BenchmarkResult {
    let mut durations_ms = Vec::with_capacity(trials as usize);
    let mut successes = 0u32;
    let mut total_audio_ms = 0.0;

    for i in 0..trials {
        let text = TRIAL_SCRIPT[i as usize % TRIAL_SCRIPT.len()];
        let req = SynthesizeRequest {
            text: text.to_string(),
            voice: "af_heart".to_string(),
            speed: 1.0,
            lang: "en-us".to_string(),
        };
        let started = Instant::now();
        match session.synthesize(&req).await {
            Ok(audio) => {
                successes += 1;
                durations_ms.push(started.elapsed().as_secs_f64() * 1000.0);
                // 16kHz mono 16-bit PCM.
                total_audio_ms += (audio.len() as f64 / 2.0) / 16_000.0 * 1000.0;
            }
            Err(e) => {
                tracing::debug!(error = %e, "benchmark trial failed");
            }
        }
    }

    if durations_ms.len() > 2 {
        let max_idx = durations_ms
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i);
        if let Some(idx) = max_idx {
            durations_ms.remove(idx);
        }
    }

    durations_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mean_ms = if durations_ms.is_empty() {
        0.0
    } else {
        durations_ms.iter().sum::<f64>() / durations_ms.len() as f64
    };
    let p95_ms = percentile(&durations_ms, 0.95);
    let total_wall_ms: f64 = durations_ms.iter().sum();
    let rtf = if total_audio_ms > 0.0 {
        total_wall_ms / total_audio_ms
    } else {
        0.0
    };

    BenchmarkResult {
        mean_ms,
        p95_ms,
        rtf,
        success_rate: successes as f64 / trials.max(1) as f64,
        trials,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Tracks cooldown and consecutive-failure state across swap attempts.
pub struct HotSwapGate {
    cooldown: Duration,
    last_swap: std::sync::Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    pause_threshold: u32,
}

impl HotSwapGate {
    pub fn new(cooldown: Duration, pause_threshold: u32) -> Self {
        Self {
            cooldown,
            last_swap: std::sync::Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            pause_threshold,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_swap
            .lock()
            .expect("hot swap gate mutex poisoned")
            .map(|t| t.elapsed() < self.cooldown)
            .unwrap_or(false)
    }

    fn is_paused(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.pause_threshold
    }

    /// Evaluate a candidate's benchmark result against the currently active
    /// result and, if it clears the bar, perform the swap through `slot`.
    pub fn consider_swap(
        &self,
        slot: &ActiveSessionSlot,
        candidate_session: Arc<dyn Session>,
        candidate_provider: ProviderId,
        candidate_result: BenchmarkResult,
        active_result: BenchmarkResult,
        swap_threshold: f64,
    ) -> Result<Option<u64>, SwapError> {
        if self.is_paused() {
            return Err(SwapError::Paused {
                failures: self.consecutive_failures.load(Ordering::Relaxed),
            });
        }
        if self.in_cooldown() {
            return Ok(None);
        }

        let improvement = if active_result.p95_ms > 0.0 {
            (active_result.p95_ms - candidate_result.p95_ms) / active_result.p95_ms
        } else {
            0.0
        };

        if improvement > swap_threshold && candidate_result.success_rate >= 0.99 {
            let generation = slot.publish(candidate_session, candidate_provider);
            *self.last_swap.lock().expect("hot swap gate mutex poisoned") = Some(Instant::now());
            self.consecutive_failures.store(0, Ordering::Relaxed);
            Ok(Some(generation))
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }
}
