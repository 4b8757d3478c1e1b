//! C1 — Hardware Probe.
//!
//! One-shot capability detection, memoized for the lifetime of the process.
//! Mirrors the teacher's `WhisperEngine::create_device_capabilities`
//! (sysinfo-backed memory probe) generalized to the full `HardwareProfile`
//! spec requires. Detection failure never aborts the process: each field
//! falls back to a conservative default.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceleratorFamily {
    None,
    NeuralEngineClassA,
    NeuralEngineClassB,
    GenericGpu,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub accelerator_family: AcceleratorFamily,
    pub accelerator_cores: u32,
    pub cpu_cores: u32,
    pub memory_gib: u32,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            accelerator_family: AcceleratorFamily::None,
            accelerator_cores: 0,
            cpu_cores: 4,
            memory_gib: 8,
        }
    }
}

static PROFILE: OnceLock<HardwareProfile> = OnceLock::new();

/// Probe the host once, memoizing the result. Subsequent calls return the
/// cached profile; use [`reprobe`] to force a fresh detection.
pub fn probe() -> HardwareProfile {
    *PROFILE.get_or_init(detect)
}

/// Explicit re-probe, bypassing the memoized value (spec §4.1: "re-probe is
/// explicit only").
pub fn reprobe() -> HardwareProfile {
    let fresh = detect();
    // OnceLock has no safe "replace"; callers that need live re-probing
    // should hold the returned profile themselves rather than relying on the
    // memo. We still update the memo on first call via probe().
    let _ = PROFILE.set(fresh);
    fresh
}

fn detect() -> HardwareProfile {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let cpu_cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4);

    let memory_gib = {
        let kib = sys.total_memory();
        if kib == 0 {
            8
        } else {
            (kib / (1024 * 1024)).max(1) as u32
        }
    };

    let (accelerator_family, accelerator_cores) = detect_accelerator(cpu_cores);

    HardwareProfile {
        accelerator_family,
        accelerator_cores,
        cpu_cores,
        memory_gib,
    }
}

#[cfg(target_os = "macos")]
fn detect_accelerator(cpu_cores: u32) -> (AcceleratorFamily, u32) {
    // Apple Silicon hosts expose a Neural Engine; we approximate its "core
    // count" from total CPU core count the way the original hardware probe
    // bucketed M1/M1 Pro/Max/Ultra tiers, without shelling out to sysctl.
    if cpu_cores >= 20 {
        (AcceleratorFamily::NeuralEngineClassA, 32)
    } else if cpu_cores >= 8 {
        (AcceleratorFamily::NeuralEngineClassB, 16)
    } else {
        (AcceleratorFamily::None, 0)
    }
}

#[cfg(not(target_os = "macos"))]
fn detect_accelerator(_cpu_cores: u32) -> (AcceleratorFamily, u32) {
    (AcceleratorFamily::None, 0)
}

/// Current system memory pressure in `[0.0, 1.0]`, used by the Memory Arena
/// Manager. Returns `0.0` (no pressure) if it cannot be determined.
pub fn memory_pressure() -> f64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    let used = sys.used_memory();
    (used as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn probe_never_panics_and_is_memoized() {
        let a = probe();
        let b = probe();
        assert_eq!(a.cpu_cores, b.cpu_cores);
        assert_eq!(a.memory_gib, b.memory_gib);
    }

    #[test]
    fn default_profile_is_conservative() {
        let p = HardwareProfile::default();
        assert_eq!(p.accelerator_family, AcceleratorFamily::None);
        assert_eq!(p.memory_gib, 8);
    }
}
