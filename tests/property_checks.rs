//! Property-based checks for the pure computations that have no external
//! collaborator to mock: complexity scoring stays in range for arbitrary
//! input, and arena sizing always stays within its configured bounds.

use kokoro_runtime::hardware::{AcceleratorFamily, HardwareProfile};
use kokoro_runtime::memory_arena::compute_arena_mib;
use kokoro_runtime::workload::complexity::score_text;
use kokoro_runtime::workload::WorkloadProfile;
use proptest::prelude::*;

proptest! {
    #[test]
    fn complexity_score_always_in_unit_range(text in ".{0,500}") {
        let score = score_text(&text);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn arena_size_always_within_configured_bounds(
        memory_gib in 1u32..128,
        accelerator_cores in 0u32..64,
        cpu_cores in 1u32..64,
        pressure in 0.0f64..1.0,
        avg_concurrency in 0.0f64..20.0,
        avg_complexity in 0.0f64..1.0,
        avg_text_len in 0.0f64..2000.0,
    ) {
        let hw = HardwareProfile {
            accelerator_family: if accelerator_cores > 0 { AcceleratorFamily::NeuralEngineClassB } else { AcceleratorFamily::None },
            accelerator_cores,
            cpu_cores,
            memory_gib,
        };
        let workload = WorkloadProfile {
            avg_concurrency,
            avg_text_len,
            avg_complexity,
            ..WorkloadProfile::default()
        };
        let size = compute_arena_mib(&hw, &workload, pressure);
        prop_assert!((256..=2048).contains(&size));
    }
}
