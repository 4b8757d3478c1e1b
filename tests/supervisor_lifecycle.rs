//! Supervisor boot/shutdown lifecycle (spec.md §8 R3: cleanup then
//! re-init restores a working ActiveSessionSlot) and the short-text TTFA
//! scenario (scenario 1) on a forced-CPU host.

use kokoro_runtime::config::RuntimeConfig;
use kokoro_runtime::provider::session::SynthesizeRequest;
use kokoro_runtime::provider::ProviderKind;
use kokoro_runtime::supervisor::{RuntimeState, Supervisor};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

fn cpu_only_config(tag: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::from_env();
    config.force_cpu_provider = true;
    config.disable_dual_sessions = true;
    config.cache_dir = std::env::temp_dir().join(format!("kokoro_runtime_test_{tag}"));
    config
}

#[tokio::test]
async fn boot_then_shutdown_then_reboot_restores_active_session() {
    let config = cpu_only_config("r3_lifecycle");

    let first = Supervisor::boot(config.clone()).await.expect("first boot");
    assert_eq!(first.state(), RuntimeState::Serving);
    first.shutdown(Arc::new(AtomicU64::new(0))).await;
    assert_eq!(first.state(), RuntimeState::Stopped);

    let second = Supervisor::boot(config).await.expect("reboot after cleanup");
    assert_eq!(second.state(), RuntimeState::Serving);
    assert!(second.status().active_provider.is_some());
}

/// Scenario 1: short-text request on a forced-CPU host produces audio
/// tagged with the CPU provider.
#[tokio::test]
async fn cpu_only_host_serves_short_text_request() {
    let config = cpu_only_config("scenario1_short_text");
    let supervisor = Supervisor::boot(config).await.expect("boot should succeed on cpu");

    let active = supervisor.active_slot().load();
    assert_eq!(active.provider_id.kind, ProviderKind::Cpu);

    let req = SynthesizeRequest {
        text: "Hello world.".to_string(),
        voice: "af_heart".to_string(),
        speed: 1.0,
        lang: "en-us".to_string(),
    };
    let audio = active.session.synthesize(&req).await.expect("synthesize should succeed");
    assert!(!audio.is_empty());
}
