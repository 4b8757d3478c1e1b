//! C9 — TTFA (Time-To-First-Audio) Monitor.
//!
//! Wraps every request, records stage durations, and finalizes an immutable
//! [`TtfaMeasurement`]. Grounded on the teacher's lock-guarded, O(1)-update
//! telemetry accumulators, generalized to percentile/EMA/WMA/SMA tracking
//! and drift/bottleneck detection per spec.md §4.9.

use crate::provider::ProviderId;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const RING_CAPACITY: usize = 2000;
const SMA_WINDOW: usize = 10;
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    TextProc,
    Inference,
    AudioGen,
    FirstChunkDeliver,
    CommOverhead,
}

impl Stage {
    const ALL: [Stage; 5] = [
        Stage::TextProc,
        Stage::Inference,
        Stage::AudioGen,
        Stage::FirstChunkDeliver,
        Stage::CommOverhead,
    ];
}

/// Accumulates stage timings for a single in-flight request. Not shared
/// across tasks; handed off to [`TtfaMonitor::finalize`] once complete.
pub struct StageTimer {
    start: Instant,
    request_id: String,
    text_len: usize,
    provider_id: ProviderId,
    stage_durations: [Option<Duration>; 5],
    stage_start: Option<Instant>,
    current_stage: Option<Stage>,
}

impl StageTimer {
    pub fn new(request_id: String, text_len: usize, provider_id: ProviderId) -> Self {
        Self {
            start: Instant::now(),
            request_id,
            text_len,
            provider_id,
            stage_durations: [None; 5],
            stage_start: None,
            current_stage: None,
        }
    }

    pub fn begin_stage(&mut self, stage: Stage) {
        self.end_stage();
        self.stage_start = Some(Instant::now());
        self.current_stage = Some(stage);
    }

    fn end_stage(&mut self) {
        if let (Some(stage), Some(started)) = (self.current_stage.take(), self.stage_start.take()) {
            let idx = stage as usize;
            self.stage_durations[idx] = Some(started.elapsed());
        }
    }

    /// Record a stage duration measured by an external collaborator (e.g.
    /// the Streaming Emitter's first-chunk latency, timed from its own
    /// start instant rather than this timer's `begin_stage`/`end_stage`
    /// pair).
    pub fn record_duration(&mut self, stage: Stage, duration: Duration) {
        self.stage_durations[stage as usize] = Some(duration);
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone)]
pub struct TtfaMeasurement {
    pub request_id: String,
    pub total_ms: f64,
    pub target_ms: f64,
    pub provider_id: ProviderId,
    pub achieved_target: bool,
    pub bottleneck_stages: Vec<Stage>,
}

/// Target latency by text length (spec.md §4.9: <50 chars -> 400ms, else
/// 800ms).
fn target_ms_for(text_len: usize) -> f64 {
    if text_len < 50 {
        400.0
    } else {
        800.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy)]
pub struct DriftEvent {
    pub severity: DriftSeverity,
    pub ema_ms: f64,
    pub overall_mean_ms: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TtfaStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub ema: f64,
    pub wma: f64,
    pub sma: f64,
    pub min: f64,
    pub max: f64,
    pub average_ttfa: f64,
    pub target_achievement_rate: f64,
}

struct Inner {
    samples: VecDeque<f64>,
    ema: Option<f64>,
    sum: f64,
    count: u64,
    achieved_count: u64,
    min: f64,
    max: f64,
}

impl Inner {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(RING_CAPACITY),
            ema: None,
            sum: 0.0,
            count: 0,
            achieved_count: 0,
            min: f64::MAX,
            max: 0.0,
        }
    }
}

pub type AlertCallback = Box<dyn Fn(&TtfaMeasurement) + Send + Sync>;

/// Lock-guarded, O(1)-amortized-update TTFA accumulator.
pub struct TtfaMonitor {
    inner: Mutex<Inner>,
    drift_threshold: f64,
    bottleneck_fraction: f64,
    critical_ms: f64,
    alert_callbacks: Mutex<Vec<AlertCallback>>,
}

impl TtfaMonitor {
    pub fn new(drift_threshold: f64, bottleneck_fraction: f64, critical_ms: f64) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            drift_threshold,
            bottleneck_fraction,
            critical_ms,
            alert_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn on_alert(&self, callback: AlertCallback) {
        self.alert_callbacks.lock().expect("ttfa monitor mutex poisoned").push(callback);
    }

    /// Finalize a [`StageTimer`] into an immutable measurement, update
    /// rolling stats, and fire alert callbacks if warranted.
    pub fn finalize(&self, mut timer: StageTimer) -> TtfaMeasurement {
        timer.end_stage();
        let total = timer.start.elapsed();
        let total_ms = total.as_secs_f64() * 1000.0;
        let target_ms = target_ms_for(timer.text_len);
        let achieved_target = total_ms <= target_ms;

        let bottleneck_stages = Stage::ALL
            .iter()
            .zip(timer.stage_durations.iter())
            .filter_map(|(stage, dur)| {
                let dur_ms = dur.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);
                if dur_ms > self.bottleneck_fraction * target_ms {
                    Some(*stage)
                } else {
                    None
                }
            })
            .collect();

        let measurement = TtfaMeasurement {
            request_id: timer.request_id.clone(),
            total_ms,
            target_ms,
            provider_id: timer.provider_id.clone(),
            achieved_target,
            bottleneck_stages,
        };

        self.record(total_ms, achieved_target);

        if total_ms > self.critical_ms || !achieved_target {
            for callback in self.alert_callbacks.lock().expect("ttfa monitor mutex poisoned").iter() {
                callback(&measurement);
            }
        }

        measurement
    }

    fn record(&self, total_ms: f64, achieved_target: bool) {
        let mut inner = self.inner.lock().expect("ttfa monitor mutex poisoned");
        if inner.samples.len() >= RING_CAPACITY {
            inner.samples.pop_front();
        }
        inner.samples.push_back(total_ms);
        inner.sum += total_ms;
        inner.count += 1;
        if achieved_target {
            inner.achieved_count += 1;
        }
        inner.min = inner.min.min(total_ms);
        inner.max = inner.max.max(total_ms);
        inner.ema = Some(match inner.ema {
            Some(prev) => EMA_ALPHA * total_ms + (1.0 - EMA_ALPHA) * prev,
            None => total_ms,
        });
    }

    /// Check for a drift event: `ema / overall_mean > drift_threshold`.
    pub fn check_drift(&self) -> Option<DriftEvent> {
        let inner = self.inner.lock().expect("ttfa monitor mutex poisoned");
        let ema = inner.ema?;
        if inner.count == 0 {
            return None;
        }
        let overall_mean = inner.sum / inner.count as f64;
        if overall_mean <= 0.0 {
            return None;
        }
        let ratio = ema / overall_mean;
        if ratio > self.drift_threshold {
            Some(DriftEvent {
                severity: if ratio > 2.0 { DriftSeverity::High } else { DriftSeverity::Medium },
                ema_ms: ema,
                overall_mean_ms: overall_mean,
            })
        } else {
            None
        }
    }

    pub fn stats(&self) -> TtfaStats {
        let inner = self.inner.lock().expect("ttfa monitor mutex poisoned");
        if inner.samples.is_empty() {
            return TtfaStats::default();
        }

        let mut sorted: Vec<f64> = inner.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p50 = percentile(&sorted, 0.50);
        let p95 = percentile(&sorted, 0.95);
        let p99 = percentile(&sorted, 0.99);

        let tail: Vec<f64> = inner
            .samples
            .iter()
            .rev()
            .take(SMA_WINDOW)
            .copied()
            .collect();
        let sma = tail.iter().sum::<f64>() / tail.len() as f64;

        // Timestamp-weighted moving average: more recent samples (higher
        // index in the tail iteration order) get a higher linear weight.
        let n = tail.len() as f64;
        let (wma_sum, weight_sum) = tail.iter().rev().enumerate().fold((0.0, 0.0), |(s, w), (i, v)| {
            let weight = (i + 1) as f64;
            (s + v * weight, w + weight)
        });
        let wma = if weight_sum > 0.0 { wma_sum / weight_sum } else { 0.0 };
        let _ = n;

        TtfaStats {
            p50,
            p95,
            p99,
            ema: inner.ema.unwrap_or(0.0),
            wma,
            sma,
            min: inner.min,
            max: inner.max,
            average_ttfa: p50,
            target_achievement_rate: inner.achieved_count as f64 / inner.count.max(1) as f64,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
