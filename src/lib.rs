//! Low-latency TTS serving runtime: hardware-aware provider selection,
//! dual-session complexity routing, adaptive memory arenas, background
//! hot-swap benchmarking, and streamed first-audio delivery.

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod error;
pub mod hardware;
pub mod http;
pub mod ingress;
pub mod memory_arena;
pub mod provider;
pub mod scheduler;
pub mod session_factory;
pub mod streaming;
pub mod supervisor;
pub mod ttfa;
pub mod warmer;
pub mod workload;

/// Install the process-wide tracing subscriber. Idempotent; safe to call
/// more than once (subsequent calls are no-ops via `try_init`).
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
