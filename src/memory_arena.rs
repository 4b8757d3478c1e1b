//! C5 — Memory Arena Manager.
//!
//! Computes an optimal arena size (MiB) from hardware, workload, and current
//! system memory pressure, following spec.md §4.5's three-multiplier model.
//! Grounded on `original_source/api/model/memory/dynamic_manager.py`'s
//! `DynamicMemoryManager` for the base/hardware/workload/pressure multiplier
//! decomposition and its adoption-threshold gating.

use crate::hardware::HardwareProfile;
use crate::workload::WorkloadProfile;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_MIB: u32 = 256;
const MAX_MIB: u32 = 2048;
const MIN_SAMPLES_FOR_RECOMPUTE: usize = 10;

fn base_size_mib(hw: &HardwareProfile) -> f64 {
    let base = if hw.memory_gib >= 32 {
        1024.0
    } else if hw.memory_gib >= 16 {
        768.0
    } else {
        384.0
    };
    let accelerator_bonus = if hw.accelerator_cores >= 32 {
        1.2
    } else if hw.accelerator_cores >= 16 {
        1.1
    } else {
        1.0
    };
    base * accelerator_bonus
}

fn hardware_multiplier(hw: &HardwareProfile) -> f64 {
    let ram_scaling = (hw.memory_gib as f64 / 16.0).clamp(0.8, 1.5);
    let cpu_scaling = (1.0 + 0.1 * (hw.cpu_cores as f64 - 4.0).max(0.0)).min(1.4);
    (ram_scaling * cpu_scaling).clamp(0.5, 2.0)
}

fn workload_multiplier(workload: &WorkloadProfile) -> f64 {
    let concurrency_factor = (1.0 + 0.2 * (workload.avg_concurrency - 1.0).max(0.0)).min(1.5);
    let complexity_factor = (1.0 + 0.3 * workload.avg_complexity).min(1.3);
    let length_factor = if workload.avg_text_len > 200.0 {
        (1.0 + 0.2 * ((workload.avg_text_len - 200.0) / 800.0).min(1.0)).min(1.2)
    } else {
        1.0
    };
    (concurrency_factor * complexity_factor * length_factor).clamp(0.7, 2.0)
}

fn pressure_multiplier(pressure: f64) -> f64 {
    if pressure >= 0.90 {
        0.6
    } else if pressure >= 0.80 {
        0.8
    } else if pressure >= 0.70 {
        0.9
    } else {
        1.0
    }
}

/// Compute the target arena size in MiB for the given inputs, ignoring any
/// recomputation gating (pure function, used both by the gated manager and
/// directly in tests).
pub fn compute_arena_mib(hw: &HardwareProfile, workload: &WorkloadProfile, memory_pressure: f64) -> u32 {
    let size = base_size_mib(hw)
        * hardware_multiplier(hw)
        * workload_multiplier(workload)
        * pressure_multiplier(memory_pressure);
    (size.round() as u32).clamp(MIN_MIB, MAX_MIB)
}

struct Inner {
    current_mib: u32,
    last_recompute: Option<Instant>,
    last_recompute_older_mean: Option<f64>,
}

/// Gated recomputation: at most every `optimization_interval`, and only with
/// enough recent samples, unless a degradation trigger bypasses the gate.
pub struct MemoryArenaManager {
    inner: Mutex<Inner>,
    optimization_interval: Duration,
}

impl MemoryArenaManager {
    pub fn new(initial_mib: u32, optimization_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_mib: initial_mib.clamp(MIN_MIB, MAX_MIB),
                last_recompute: None,
                last_recompute_older_mean: None,
            }),
            optimization_interval,
        }
    }

    pub fn current_mib(&self) -> u32 {
        self.inner.lock().expect("arena manager mutex poisoned").current_mib
    }

    /// Attempt a recomputation. Returns `Some(new_mib)` only if the gate
    /// passed and the adoption threshold (>10% or >64 MiB delta) was met.
    pub fn maybe_recompute(
        &self,
        hw: &HardwareProfile,
        workload: &WorkloadProfile,
        memory_pressure: f64,
    ) -> Option<u32> {
        let mut inner = self.inner.lock().expect("arena manager mutex poisoned");

        let degrading = is_degradation_trigger(workload);
        let interval_elapsed = inner
            .last_recompute
            .map(|t| t.elapsed() >= self.optimization_interval)
            .unwrap_or(true);
        let enough_samples = workload.recent_latencies.len() >= MIN_SAMPLES_FOR_RECOMPUTE;

        if !degrading && (!interval_elapsed || !enough_samples) {
            return None;
        }

        let candidate = compute_arena_mib(hw, workload, memory_pressure);
        inner.last_recompute = Some(Instant::now());

        let delta = (candidate as i64 - inner.current_mib as i64).unsigned_abs() as u32;
        let relative = delta as f64 / inner.current_mib.max(1) as f64;
        if relative > 0.10 || delta > 64 {
            inner.current_mib = candidate;
            tracing::info!(new_mib = candidate, "arena size recomputed and adopted");
            Some(candidate)
        } else {
            None
        }
    }
}

/// Recent mean > 1.2x older mean bypasses the interval/sample gate
/// (spec.md §4.5).
fn is_degradation_trigger(workload: &WorkloadProfile) -> bool {
    let samples = &workload.recent_latencies;
    if samples.len() < 4 {
        return false;
    }
    let half = samples.len() / 2;
    let older_mean: f64 = samples[..half].iter().sum::<f64>() / half as f64;
    let newer_mean: f64 = samples[half..].iter().sum::<f64>() / (samples.len() - half) as f64;
    older_mean > 0.0 && newer_mean > older_mean * 1.2
}
