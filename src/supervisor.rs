//! C12 — Runtime Supervisor.
//!
//! Drives the lifecycle state machine `Booting -> FastInit -> Warming ->
//! Optimizing -> Serving -> Draining -> Stopped`, with a `Failed` sink from
//! FastInit. Grounded on the teacher's `initialize_systems`/app-setup
//! sequencing (probe hardware, build engine, install into shared state,
//! spawn background tasks), generalized into an explicit state machine with
//! a cancellable background-task set. Also owns the request-facing
//! collaborators (Ingress Gate, Scheduler, TTFA Monitor) so the HTTP layer
//! has one thing to ask for everything a request needs (spec.md §2: "Ingress
//! Gate -> Supervisor -> Scheduler -> chosen Session -> Streaming Emitter").

use crate::benchmark::{self, ActiveSession, ActiveSessionSlot, BenchmarkResult, HotSwapGate};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::hardware::{self, HardwareProfile};
use crate::ingress::{IngressGate, IngressGateConfig};
use crate::memory_arena::MemoryArenaManager;
use crate::provider::session::{Session, SynthesizeRequest};
use crate::provider::{self, ProviderId, ProviderKind};
use crate::scheduler::{Role, Scheduler, SessionPool};
use crate::session_factory;
use crate::ttfa::TtfaMonitor;
use crate::warmer::{self, WarmUpReport, WarmUpState};
use crate::workload::WorkloadAnalyzer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Booting,
    FastInit,
    Warming,
    Optimizing,
    Serving,
    Draining,
    Stopped,
    Failed,
}

impl RuntimeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RuntimeState::Booting,
            1 => RuntimeState::FastInit,
            2 => RuntimeState::Warming,
            3 => RuntimeState::Optimizing,
            4 => RuntimeState::Serving,
            5 => RuntimeState::Draining,
            6 => RuntimeState::Stopped,
            _ => RuntimeState::Failed,
        }
    }
}

pub struct StatusSnapshot {
    pub state: RuntimeState,
    pub model_loaded: bool,
    pub active_provider: Option<ProviderId>,
    pub hardware: HardwareProfile,
    pub providers: Vec<ProviderId>,
    pub warm_up_complete: bool,
    pub ttfa: crate::ttfa::TtfaStats,
}

/// Outcome of routing and executing one synthesis request through the
/// Scheduler, timed end to end for the TTFA Monitor.
pub struct DispatchOutcome {
    pub audio: Vec<u8>,
    pub provider_id: ProviderId,
    pub role_used: Role,
    pub stage_timer: crate::ttfa::StageTimer,
}

/// Owns all long-lived runtime state and background task handles. A single
/// instance lives for the process lifetime; `shutdown` drains it.
pub struct Supervisor {
    config: RuntimeConfig,
    state: AtomicU8,
    hardware: HardwareProfile,
    providers: Vec<ProviderId>,
    active_slot: Arc<ActiveSessionSlot>,
    arena_manager: Arc<MemoryArenaManager>,
    workload: Arc<WorkloadAnalyzer>,
    warm_up_state: Arc<WarmUpState>,
    ingress: Arc<IngressGate>,
    ttfa: Arc<TtfaMonitor>,
    scheduler: Arc<RwLock<Scheduler>>,
    hot_swap_gate: Arc<HotSwapGate>,
    cancellation: CancellationToken,
    background_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Role -> ProviderId mapping set once at warm-up (spec.md §4.6): on an
/// accelerator-equipped host, `fast` and `heavy` both point at the
/// accelerator (it is assumed to dominate both ends of the complexity
/// range) while `balanced` stays on CPU; CPU-only hosts put the single CPU
/// session in every role so the role-fallthrough machinery still degrades
/// gracefully rather than bouncing every request to the raw
/// `ActiveSessionSlot` path. Recorded as an Open Question resolution in
/// DESIGN.md (the spec names the mapping by example, not exhaustively).
fn build_session_pool(
    config: &RuntimeConfig,
    hw: &HardwareProfile,
    arena_mib: u32,
    cache_dir: &std::path::Path,
) -> Result<SessionPool, RuntimeError> {
    let mut pool = SessionPool::new();
    if config.disable_dual_sessions {
        return Ok(pool);
    }

    if hw.accelerator_family != hardware::AcceleratorFamily::None {
        let accelerator = session_factory::build_session(&ProviderId::accelerator(), hw, arena_mib, cache_dir)
            .map_err(RuntimeError::SessionBuild)?;
        pool.set(Role::Fast, accelerator.clone());
        pool.set(Role::Heavy, accelerator);
        let cpu = session_factory::build_session(&ProviderId::cpu(), hw, arena_mib, cache_dir)
            .map_err(RuntimeError::SessionBuild)?;
        pool.set(Role::Balanced, cpu);
    } else {
        let cpu = session_factory::build_session(&ProviderId::cpu(), hw, arena_mib, cache_dir)
            .map_err(RuntimeError::SessionBuild)?;
        pool.set(Role::Fast, cpu.clone());
        pool.set(Role::Balanced, cpu.clone());
        pool.set(Role::Heavy, cpu);
    }

    Ok(pool)
}

impl Supervisor {
    /// Run `FastInit` synchronously: probe hardware, enumerate providers,
    /// build a session on the preferred provider, install it as the active
    /// session, and run a one-shot smoke test (falling back to CPU exactly
    /// once on failure).
    pub async fn boot(config: RuntimeConfig) -> Result<Arc<Self>, RuntimeError> {
        let hw = if config.force_cpu_provider {
            HardwareProfile::default()
        } else {
            hardware::probe()
        };

        let providers = provider::enumerate_providers(&hw)?;
        let preferred = providers.first().cloned().ok_or(RuntimeError::NotReady)?;

        let arena_manager = Arc::new(MemoryArenaManager::new(
            config.arena_min_mib,
            config.arena_optimization_interval,
        ));

        let built = session_factory::build_session(
            &preferred,
            &hw,
            arena_manager.current_mib(),
            &config.cache_dir,
        );

        let session = match built {
            Ok(session) => match smoke_test(&session).await {
                Ok(()) => session,
                Err(_) if preferred.kind != ProviderKind::Cpu => {
                    tracing::warn!(provider = %preferred, "fast-init smoke test failed, falling back to CPU");
                    let cpu = ProviderId::cpu();
                    let fallback = session_factory::build_session(&cpu, &hw, arena_manager.current_mib(), &config.cache_dir)?;
                    smoke_test(&fallback).await.map_err(RuntimeError::Inference)?;
                    fallback
                }
                Err(e) => return Err(RuntimeError::Inference(e)),
            },
            Err(e) => return Err(RuntimeError::SessionBuild(e)),
        };

        let active_provider = session.provider_id().clone();
        let active_slot = Arc::new(ActiveSessionSlot::new(ActiveSession {
            session: session.clone(),
            provider_id: active_provider,
            generation: 0,
        }));

        let pool = build_session_pool(&config, &hw, arena_manager.current_mib(), &config.cache_dir)?;
        let scheduler = Scheduler::new(pool, session, config.request_timeout);

        let ingress = Arc::new(IngressGate::new(IngressGateConfig {
            localhost_only: config.localhost_only,
            per_minute_limit: config.per_minute_limit,
            per_hour_limit: config.per_hour_limit,
            suspicious_threshold: config.suspicious_threshold,
            block_duration: config.block_duration,
            benchmark_user_agent_exempt: config.benchmark_user_agent_exempt,
        }));

        let ttfa = Arc::new(TtfaMonitor::new(config.drift_threshold, config.bottleneck_fraction, config.critical_ms));
        ttfa.on_alert(Box::new(|measurement| {
            tracing::warn!(
                request_id = %measurement.request_id,
                total_ms = measurement.total_ms,
                target_ms = measurement.target_ms,
                provider = %measurement.provider_id,
                "TTFA target missed or critical latency exceeded"
            );
        }));

        let hot_swap_gate = Arc::new(HotSwapGate::new(config.swap_cooldown, config.swap_failure_pause_threshold));

        let supervisor = Arc::new(Self {
            config,
            state: AtomicU8::new(RuntimeState::FastInit as u8),
            hardware: hw,
            providers,
            active_slot,
            arena_manager,
            workload: Arc::new(WorkloadAnalyzer::new()),
            warm_up_state: Arc::new(WarmUpState::new()),
            ingress,
            ttfa,
            scheduler: Arc::new(RwLock::new(scheduler)),
            hot_swap_gate,
            cancellation: CancellationToken::new(),
            background_tasks: std::sync::Mutex::new(Vec::new()),
        });

        supervisor.set_state(RuntimeState::Serving);
        supervisor.spawn_background_tasks();
        Ok(supervisor)
    }

    fn set_state(&self, state: RuntimeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn active_slot(&self) -> Arc<ActiveSessionSlot> {
        self.active_slot.clone()
    }

    pub fn workload(&self) -> Arc<WorkloadAnalyzer> {
        self.workload.clone()
    }

    pub fn arena_manager(&self) -> Arc<MemoryArenaManager> {
        self.arena_manager.clone()
    }

    pub fn ingress(&self) -> Arc<IngressGate> {
        self.ingress.clone()
    }

    pub fn ttfa(&self) -> Arc<TtfaMonitor> {
        self.ttfa.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn status(&self) -> StatusSnapshot {
        let active = self.active_slot.load();
        StatusSnapshot {
            state: self.state(),
            model_loaded: true,
            active_provider: Some(active.provider_id.clone()),
            hardware: self.hardware,
            providers: self.providers.clone(),
            warm_up_complete: self.warm_up_state.is_complete(),
            ttfa: self.ttfa.stats(),
        }
    }

    /// Route and execute one synthesis request: score its complexity, hand
    /// it to the Scheduler, and hand back a [`StageTimer`] already past its
    /// `Inference` stage so the caller (HTTP handler) can add delivery
    /// stages before finalizing it with the TTFA Monitor.
    pub async fn dispatch(
        &self,
        req: &SynthesizeRequest,
        correlation_id: &str,
        in_flight_concurrency: u32,
    ) -> Result<DispatchOutcome, RuntimeError> {
        let complexity = self.workload.complexity(&req.text);
        let mut timer = crate::ttfa::StageTimer::new(correlation_id.to_string(), req.text.len(), self.active_slot.load().provider_id.clone());

        timer.begin_stage(crate::ttfa::Stage::TextProc);
        timer.begin_stage(crate::ttfa::Stage::Inference);
        let scheduler = self.scheduler.read().await;
        let outcome = scheduler.dispatch(req, complexity).await;
        drop(scheduler);
        timer.begin_stage(crate::ttfa::Stage::AudioGen);

        let outcome = outcome.map_err(RuntimeError::Inference)?;

        use chrono::Timelike;
        self.workload.observe(crate::workload::RequestObservation {
            text: &req.text,
            in_flight_concurrency,
            latency_ms: outcome.duration.as_secs_f64() * 1000.0,
            hour_of_day: chrono::Utc::now().hour() as u8,
        });

        Ok(DispatchOutcome {
            audio: outcome.audio,
            provider_id: outcome.provider_id,
            role_used: outcome.role_used,
            stage_timer: timer,
        })
    }

    /// Delete the on-disk JSON caches and drop the cached complexity scores
    /// (`/performance/clear_cache`). This intentionally does *not* tear down
    /// the live active Session: doing so would violate I1 (never observed
    /// null) for in-flight requests. "Drops Sessions" from spec.md §6 is
    /// interpreted as resetting warm-up state so the next Optimizing cycle
    /// re-populates the pipeline caches from scratch, not as destroying
    /// serving capacity.
    pub fn clear_caches(&self) -> usize {
        self.workload.clear_complexity_cache();
        self.warm_up_state.reset_warm_up();

        let mut removed = 0usize;
        for name in ["phoneme_cache.json", "inference_cache.json", "primer_microcache.json", "model_cache.json", "session_cache.json"] {
            let path = self.config.cache_dir.join(name);
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
            let gz = self.config.cache_dir.join(format!("{name}.gz"));
            if std::fs::remove_file(&gz).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Run an on-demand benchmark and write a report under `reports_dir`
    /// (`/performance/benchmark/{kind}`, spec.md §6). Returns the summary
    /// that was also persisted to disk.
    pub async fn run_benchmark(&self, kind: &str) -> serde_json::Value {
        let active = self.active_slot.load();
        let mut provider_results = Vec::new();

        let active_result = benchmark::run_benchmark(&active.session, 5).await;
        provider_results.push((active.provider_id.clone(), active_result));

        if kind == "provider" || kind == "comprehensive" {
            for candidate in self.providers.iter().filter(|p| p.kind != active.provider_id.kind) {
                match session_factory::build_session(candidate, &self.hardware, self.arena_manager.current_mib(), &self.config.cache_dir) {
                    Ok(session) => {
                        let result = benchmark::run_benchmark(&session, 5).await;
                        provider_results.push((candidate.clone(), result));
                    }
                    Err(e) => tracing::warn!(provider = %candidate, error = %e, "benchmark: candidate session build failed"),
                }
            }
        }

        let ttfa_stats = self.ttfa.stats();

        let report = serde_json::json!({
            "kind": kind,
            "generated_at": chrono::Utc::now(),
            "providers": provider_results.iter().map(|(id, r)| serde_json::json!({
                "provider": id.name,
                "mean_ms": r.mean_ms,
                "p95_ms": r.p95_ms,
                "rtf": r.rtf,
                "success_rate": r.success_rate,
                "trials": r.trials,
            })).collect::<Vec<_>>(),
            "ttfa": {
                "p50": ttfa_stats.p50,
                "p95": ttfa_stats.p95,
                "p99": ttfa_stats.p99,
                "target_achievement_rate": ttfa_stats.target_achievement_rate,
            },
        });

        if let Ok(bytes) = serde_json::to_vec_pretty(&report) {
            let _ = std::fs::create_dir_all(&self.config.reports_dir);
            let filename = format!("benchmark_{kind}_{}.json", chrono::Utc::now().timestamp_millis());
            let _ = std::fs::write(self.config.reports_dir.join(filename), bytes);
        }

        report
    }

    /// Spawn the non-blocking Warming/Optimizing background tasks. State is
    /// already `Serving` by the time these run (spec.md §4.12: Warming is
    /// non-blocking).
    fn spawn_background_tasks(self: &Arc<Self>) {
        let warm_up_supervisor = self.clone();
        let warm_up_task = tokio::spawn(async move {
            warm_up_supervisor.set_state(RuntimeState::Warming);
            let active = warm_up_supervisor.active_slot.load();
            let report: WarmUpReport = warmer::warm_up(&active.session).await;
            if !report.errors.is_empty() {
                tracing::warn!(errors = ?report.errors, "warm-up completed with errors");
            }
            warm_up_supervisor.warm_up_state.mark_complete();
            warm_up_supervisor.set_state(RuntimeState::Optimizing);
        });

        let mut tasks = Vec::new();
        tasks.push(warm_up_task);

        let arena_token = self.cancellation.clone();
        let arena_supervisor = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(arena_supervisor.config.arena_optimization_interval);
            loop {
                tokio::select! {
                    _ = arena_token.cancelled() => break,
                    _ = interval.tick() => {
                        let workload_snapshot = arena_supervisor.workload.profile();
                        let pressure = hardware::memory_pressure();
                        arena_supervisor
                            .arena_manager
                            .maybe_recompute(&arena_supervisor.hardware, &workload_snapshot, pressure);
                    }
                }
            }
        }));

        if !self.config.skip_background_benchmarking {
            let bench_token = self.cancellation.clone();
            let bench_supervisor = self.clone();
            let cooldown = self.config.swap_cooldown;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(cooldown);
                loop {
                    tokio::select! {
                        _ = bench_token.cancelled() => break,
                        _ = interval.tick() => {
                            bench_supervisor.run_benchmark_cycle().await;
                        }
                    }
                }
            }));
        }

        let mut guard = self.background_tasks.lock().expect("supervisor tasks mutex poisoned");
        guard.extend(tasks);
    }

    /// C8: benchmark every non-active candidate provider against the
    /// currently active one and hot-swap if a candidate clears the
    /// improvement/success-rate bar (spec.md §4.8).
    async fn run_benchmark_cycle(self: &Arc<Self>) {
        let active = self.active_slot.load();
        let active_result: BenchmarkResult = benchmark::run_benchmark(&active.session, 5).await;

        for candidate_provider in self.providers.iter().filter(|p| p.kind != active.provider_id.kind) {
            let candidate_session = match session_factory::build_session(
                candidate_provider,
                &self.hardware,
                self.arena_manager.current_mib(),
                &self.config.cache_dir,
            ) {
                Ok(session) => session,
                Err(e) => {
                    tracing::debug!(provider = %candidate_provider, error = %e, "hot-swap candidate build failed, skipping");
                    continue;
                }
            };

            let candidate_result = benchmark::run_benchmark(&candidate_session, 5).await;
            let old_kind = active.provider_id.kind;

            match self.hot_swap_gate.consider_swap(
                &self.active_slot,
                candidate_session.clone(),
                candidate_provider.clone(),
                candidate_result,
                active_result,
                self.config.swap_threshold,
            ) {
                Ok(Some(generation)) => {
                    tracing::info!(provider = %candidate_provider, generation, "hot-swap performed");
                    self.update_scheduler_for_swap(old_kind, candidate_session).await;
                    self.warm_up_state.reset_warm_up();
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "hot-swap gate refused candidate");
                    break;
                }
            }
        }
    }

    /// Update every role slot that was occupied by the just-replaced
    /// provider, and the Scheduler's ActiveSessionSlot fallback path
    /// (spec.md §4.8 point 4).
    async fn update_scheduler_for_swap(&self, old_kind: ProviderKind, new_session: Arc<dyn Session>) {
        let mut scheduler = self.scheduler.write().await;
        for role in [Role::Fast, Role::Balanced, Role::Heavy] {
            if scheduler.provider_kind_of(role) == Some(old_kind) {
                scheduler.set_role(role, new_session.clone());
            }
        }
        scheduler.set_active_session(new_session);
    }

    /// Stop admitting new requests, wait up to `drain_timeout` for
    /// in-flight work, then release resources. `in_flight` is supplied by
    /// the caller (typically the HTTP server's graceful-shutdown hook).
    pub async fn shutdown(&self, in_flight: Arc<std::sync::atomic::AtomicU64>) {
        self.set_state(RuntimeState::Draining);
        self.cancellation.cancel();

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while in_flight.load(Ordering::Acquire) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        let accelerator_temp = session_factory::accelerator_temp_dir(&self.config.cache_dir);
        if accelerator_temp.exists() {
            let _ = std::fs::remove_dir_all(&accelerator_temp);
        }

        let mut tasks = self.background_tasks.lock().expect("supervisor tasks mutex poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }

        self.set_state(RuntimeState::Stopped);
    }
}

async fn smoke_test(session: &Arc<dyn Session>) -> Result<(), crate::error::InferenceError> {
    let req = SynthesizeRequest {
        text: "smoke test".to_string(),
        voice: "af_heart".to_string(),
        speed: 1.0,
        lang: "en-us".to_string(),
    };
    session.synthesize(&req).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(tag: &str) -> RuntimeConfig {
        let mut config = RuntimeConfig::from_env();
        config.force_cpu_provider = true;
        config.cache_dir = std::env::temp_dir().join(format!("kokoro_runtime_supervisor_test_{tag}"));
        config.skip_background_benchmarking = true;
        config
    }

    #[tokio::test]
    async fn boot_reaches_serving_state() {
        let supervisor = Supervisor::boot(test_config("boot")).await.expect("boot should succeed on cpu");
        assert_eq!(supervisor.state(), RuntimeState::Serving);
        assert!(supervisor.status().model_loaded);
    }

    #[tokio::test]
    async fn shutdown_reaches_stopped_state() {
        let supervisor = Supervisor::boot(test_config("shutdown")).await.expect("boot should succeed on cpu");
        let in_flight = Arc::new(std::sync::atomic::AtomicU64::new(0));
        supervisor.shutdown(in_flight).await;
        assert_eq!(supervisor.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn dispatch_routes_through_scheduler_and_records_ttfa() {
        let supervisor = Supervisor::boot(test_config("dispatch")).await.expect("boot should succeed on cpu");
        let req = SynthesizeRequest {
            text: "Hello world.".to_string(),
            voice: "af_heart".to_string(),
            speed: 1.0,
            lang: "en-us".to_string(),
        };
        let outcome = supervisor.dispatch(&req, "corr-1", 1).await.expect("dispatch should succeed");
        assert!(!outcome.audio.is_empty());
        let measurement = supervisor.ttfa().finalize(outcome.stage_timer);
        assert_eq!(measurement.request_id, "corr-1");
        assert!(supervisor.ttfa().stats().p50 >= 0.0);
    }

    #[tokio::test]
    async fn clear_caches_resets_warm_up_state() {
        let supervisor = Supervisor::boot(test_config("clear_cache")).await.expect("boot should succeed on cpu");
        supervisor.clear_caches();
        assert!(!supervisor.status().warm_up_complete);
    }
}
