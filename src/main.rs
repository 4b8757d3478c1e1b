//! Binary entry point: parse CLI flags, assemble `RuntimeConfig`, boot the
//! Supervisor, and serve the HTTP surface. Grounded on the teacher's
//! `setup()` closure (spawn async init, log outcome, keep the process
//! alive) but replacing the Tauri shell with a plain `clap`-driven daemon.

use clap::Parser;
use kokoro_runtime::config::RuntimeConfig;
use kokoro_runtime::http::{self, AppState};
use kokoro_runtime::supervisor::Supervisor;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "kokoro-runtimed", about = "Low-latency TTS serving runtime")]
struct Cli {
    /// Address to bind the HTTP surface to.
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Force the CPU provider even if an accelerator is detected.
    #[arg(long)]
    force_cpu: bool,

    /// Skip background provider benchmarking (useful for tests/CI).
    #[arg(long)]
    skip_benchmarking: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kokoro_runtime::init_logging();

    let cli = Cli::parse();
    let mut config = RuntimeConfig::from_env();
    config.force_cpu_provider = config.force_cpu_provider || cli.force_cpu;
    config.skip_background_benchmarking = config.skip_background_benchmarking || cli.skip_benchmarking;

    tracing::info!(?cli.listen, "booting runtime");
    let supervisor = Supervisor::boot(config).await?;

    let state = AppState {
        supervisor: supervisor.clone(),
        in_flight: Arc::new(AtomicU64::new(0)),
    };
    let router = http::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    tracing::info!(addr = %cli.listen, "serving");

    let shutdown_supervisor = supervisor.clone();
    let in_flight_for_shutdown = state.in_flight.clone();
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining");
            shutdown_supervisor.shutdown(in_flight_for_shutdown).await;
        })
        .await?;

    Ok(())
}
