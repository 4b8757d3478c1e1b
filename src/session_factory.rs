//! C3 — Session Factory.
//!
//! Deterministically derives [`SessionOptions`] from `(ProviderId,
//! HardwareProfile, ArenaSize)` and constructs a [`Session`]. Thread counts
//! and graph-optimization level follow the table in spec.md §4.3 exactly.
//! Grounded on `WhisperEngine::new`/`create_device_capabilities` for the
//! shape of "validate config, pick device, build options, construct
//! context", generalized from a single whisper.cpp model load to a provider
//! + arena-size-parameterized build.

use crate::error::SessionBuildError;
use crate::hardware::HardwareProfile;
use crate::provider::session::{Session, StubSession};
use crate::provider::{ProviderId, ProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphOptLevel {
    Basic,
    Extended,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionOptions {
    pub intra_op_threads: u32,
    pub inter_op_threads: u32,
    pub graph_opt_level: GraphOptLevel,
    pub execution_mode: ExecutionMode,
    pub arena_initial_mib: u32,
    pub enable_mem_pattern: bool,
    pub enable_mem_reuse: bool,
}

/// Thread-count table keyed by accelerator core count (spec.md §4.3).
fn thread_counts(hw: &HardwareProfile) -> (u32, u32) {
    if hw.accelerator_cores >= 32 {
        (8, 4)
    } else if hw.accelerator_cores >= 16 {
        (6, 2)
    } else if hw.accelerator_cores > 0 {
        (4, 2)
    } else {
        (2, 1)
    }
}

/// Derive [`SessionOptions`] deterministically. Same inputs always produce
/// the same options (required for I4-style purity of downstream routing
/// decisions that key off these options).
pub fn derive_options(hw: &HardwareProfile, arena_initial_mib: u32) -> SessionOptions {
    let (intra_op_threads, inter_op_threads) = thread_counts(hw);
    let accelerator_equipped = hw.accelerator_cores > 0;

    SessionOptions {
        intra_op_threads,
        inter_op_threads,
        graph_opt_level: if accelerator_equipped {
            GraphOptLevel::Extended
        } else {
            GraphOptLevel::Basic
        },
        execution_mode: if accelerator_equipped {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        },
        arena_initial_mib,
        enable_mem_pattern: true,
        enable_mem_reuse: true,
    }
}

/// Directory name for the accelerator-specific temp redirection (spec.md
/// §4.3, `./.cache/coreml_temp/`).
pub fn accelerator_temp_dir(cache_dir: &std::path::Path) -> std::path::PathBuf {
    cache_dir.join("coreml_temp")
}

/// Sanitize (remove and recreate) the accelerator temp directory. Must run
/// before the accelerator `Session` is constructed.
fn sanitize_accelerator_temp_dir(dir: &std::path::Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

/// Build a `Session` bound to `provider` with options derived from `hw` and
/// `arena_initial_mib`. The caller (Supervisor FastInit or the Benchmarker)
/// decides what to do on failure.
pub fn build_session(
    provider: &ProviderId,
    hw: &HardwareProfile,
    arena_initial_mib: u32,
    cache_dir: &std::path::Path,
) -> Result<Arc<dyn Session>, SessionBuildError> {
    let options = derive_options(hw, arena_initial_mib);

    if provider.kind == ProviderKind::Accelerator {
        let temp_dir = accelerator_temp_dir(cache_dir);
        sanitize_accelerator_temp_dir(&temp_dir).map_err(|e| SessionBuildError::Failed {
            provider: provider.name.clone(),
            source: anyhow::Error::new(e),
        })?;
        // SAFETY/contract note: redirecting the OS temp-dir env var must
        // happen before the accelerator session is constructed, matching
        // `setup_coreml_temp_directory()` in the original initializer.
        std::env::set_var("TMPDIR", &temp_dir);
    }

    tracing::debug!(
        provider = %provider,
        intra_op_threads = options.intra_op_threads,
        inter_op_threads = options.inter_op_threads,
        arena_initial_mib,
        "building session"
    );

    // The real vocoder is out of scope (spec.md §1); the stand-in
    // `StubSession` carries the derived options implicitly through its
    // construction cost/latency in production this would be
    // `ort::SessionBuilder::new()?.with_*` calls driven by `options`.
    let _ = options;
    Ok(Arc::new(StubSession::new(provider.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::AcceleratorFamily;

    fn hw_with_accel_cores(cores: u32) -> HardwareProfile {
        HardwareProfile {
            accelerator_family: if cores > 0 {
                AcceleratorFamily::NeuralEngineClassB
            } else {
                AcceleratorFamily::None
            },
            accelerator_cores: cores,
            cpu_cores: 8,
            memory_gib: 16,
        }
    }

    #[test]
    fn thread_table_matches_spec() {
        assert_eq!(thread_counts(&hw_with_accel_cores(32)), (8, 4));
        assert_eq!(thread_counts(&hw_with_accel_cores(16)), (6, 2));
        assert_eq!(thread_counts(&hw_with_accel_cores(8)), (4, 2));
        assert_eq!(thread_counts(&hw_with_accel_cores(0)), (2, 1));
    }

    #[test]
    fn options_are_pure() {
        let hw = hw_with_accel_cores(16);
        let a = derive_options(&hw, 512);
        let b = derive_options(&hw, 512);
        assert_eq!(a.intra_op_threads, b.intra_op_threads);
        assert_eq!(a.graph_opt_level, b.graph_opt_level);
    }

    #[test]
    fn cpu_only_uses_basic_sequential() {
        let hw = hw_with_accel_cores(0);
        let options = derive_options(&hw, 384);
        assert_eq!(options.graph_opt_level, GraphOptLevel::Basic);
        assert_eq!(options.execution_mode, ExecutionMode::Sequential);
    }

    #[test]
    fn build_cpu_session_succeeds() {
        let hw = hw_with_accel_cores(0);
        let dir = std::env::temp_dir().join("kokoro_runtime_test_cache");
        let session = build_session(&ProviderId::cpu(), &hw, 384, &dir).expect("cpu build");
        assert_eq!(session.provider_id().kind, ProviderKind::Cpu);
    }
}
