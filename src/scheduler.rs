//! C6 — Dual-Session Scheduler.
//!
//! Owns the `SessionPool` (fast/balanced/heavy) and routes each request to
//! the role matching its complexity score. Grounded on
//! `original_source/api/model/sessions/manager.py`'s adaptive text-length
//! routing for the overall "role lookup, fall through, retry on lower role"
//! shape; this spec canonicalizes the routing key as the complexity-score
//! three-bucket scheme (spec.md §9), not raw text length.

use crate::error::InferenceError;
use crate::provider::session::{Session, SynthesizeRequest};
use crate::provider::ProviderId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Smoothing factor for the per-role latency EMA, matching the TTFA
/// monitor's `EMA_ALPHA` (spec.md §4.6 step 4: tracked "for future
/// re-routing experiments", not yet consulted by `dispatch`).
const ROLE_LATENCY_EMA_ALPHA: f64 = 0.1;

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Fast,
    Balanced,
    Heavy,
}

impl Role {
    /// Complexity-score routing table (spec.md §4.6): `<0.33 -> fast`,
    /// `<0.67 -> balanced`, `else -> heavy`.
    pub fn for_complexity(score: f64) -> Role {
        if score < 0.33 {
            Role::Fast
        } else if score < 0.67 {
            Role::Balanced
        } else {
            Role::Heavy
        }
    }

    /// Next lower role in the retry chain (heavy -> balanced -> fast ->
    /// None).
    fn fallback(self) -> Option<Role> {
        match self {
            Role::Heavy => Some(Role::Balanced),
            Role::Balanced => Some(Role::Fast),
            Role::Fast => None,
        }
    }
}

#[derive(Default)]
struct RoleCounters {
    total: AtomicU64,
    successes: AtomicU64,
    cumulative_duration_ms: AtomicU64,
    in_flight: AtomicU64,
    /// Unix epoch millis of the most recent dispatch attempt, 0 if never
    /// used.
    last_used_unix_ms: AtomicU64,
    /// EMA of successful latencies in ms, bit-cast into an `AtomicU64`; 0
    /// means no successful sample has landed yet.
    latency_ema_ms_bits: AtomicU64,
}

impl RoleCounters {
    fn mark_used(&self) {
        self.last_used_unix_ms.store(now_unix_ms(), Ordering::Relaxed);
    }

    fn record_latency(&self, sample_ms: f64) {
        let _ = self
            .latency_ema_ms_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let next = if bits == 0 {
                    sample_ms
                } else {
                    let prev = f64::from_bits(bits);
                    ROLE_LATENCY_EMA_ALPHA * sample_ms + (1.0 - ROLE_LATENCY_EMA_ALPHA) * prev
                };
                Some(next.to_bits())
            });
    }

    fn latency_ema_ms(&self) -> f64 {
        f64::from_bits(self.latency_ema_ms_bits.load(Ordering::Relaxed))
    }
}

struct RoleSlot {
    session: Arc<dyn Session>,
    counters: RoleCounters,
}

/// Up to three named sessions mapped to roles, each with independent
/// utilization counters (spec.md §3, `SessionPool (dual)`).
pub struct SessionPool {
    fast: Option<RoleSlot>,
    balanced: Option<RoleSlot>,
    heavy: Option<RoleSlot>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            fast: None,
            balanced: None,
            heavy: None,
        }
    }

    pub fn set(&mut self, role: Role, session: Arc<dyn Session>) {
        let slot = Some(RoleSlot {
            session,
            counters: RoleCounters::default(),
        });
        match role {
            Role::Fast => self.fast = slot,
            Role::Balanced => self.balanced = slot,
            Role::Heavy => self.heavy = slot,
        }
    }

    fn slot(&self, role: Role) -> Option<&RoleSlot> {
        match role {
            Role::Fast => self.fast.as_ref(),
            Role::Balanced => self.balanced.as_ref(),
            Role::Heavy => self.heavy.as_ref(),
        }
    }

    /// Resolve `role`, falling through to lower roles if absent.
    fn resolve(&self, role: Role) -> Option<(Role, &RoleSlot)> {
        let mut current = Some(role);
        while let Some(r) = current {
            if let Some(slot) = self.slot(r) {
                return Some((r, slot));
            }
            current = r.fallback();
        }
        None
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoleUtilization {
    pub total: u64,
    pub successes: u64,
    pub cumulative_duration_ms: u64,
    pub in_flight: u64,
    pub last_used_unix_ms: u64,
    pub latency_ema_ms: f64,
}

pub struct SynthesisOutcome {
    pub audio: Vec<u8>,
    pub role_used: Role,
    pub provider_id: ProviderId,
    pub duration: Duration,
}

/// Routes requests by complexity score, falls back through roles on
/// transient failure, and enforces a per-request timeout.
pub struct Scheduler {
    pool: SessionPool,
    active_session: Arc<dyn Session>,
    request_timeout: Duration,
}

impl Scheduler {
    pub fn new(pool: SessionPool, active_session: Arc<dyn Session>, request_timeout: Duration) -> Self {
        Self {
            pool,
            active_session,
            request_timeout,
        }
    }

    pub fn role_utilization(&self, role: Role) -> Option<RoleUtilization> {
        self.pool.slot(role).map(|slot| RoleUtilization {
            total: slot.counters.total.load(Ordering::Relaxed),
            successes: slot.counters.successes.load(Ordering::Relaxed),
            cumulative_duration_ms: slot.counters.cumulative_duration_ms.load(Ordering::Relaxed),
            in_flight: slot.counters.in_flight.load(Ordering::Relaxed),
            last_used_unix_ms: slot.counters.last_used_unix_ms.load(Ordering::Relaxed),
            latency_ema_ms: slot.counters.latency_ema_ms(),
        })
    }

    /// The provider kind currently occupying `role`, if any. Used by the
    /// Benchmarker (C8) to decide which role slots a hot-swap should update.
    pub fn provider_kind_of(&self, role: Role) -> Option<crate::provider::ProviderKind> {
        self.pool.slot(role).map(|slot| slot.session.provider_id().kind)
    }

    /// Replace the session occupying `role`, resetting its utilization
    /// counters. Used after a hot-swap (spec.md §4.8 point 4).
    pub fn set_role(&mut self, role: Role, session: Arc<dyn Session>) {
        self.pool.set(role, session);
    }

    /// Replace the fallback session used when every role is absent (or
    /// `DISABLE_DUAL_SESSIONS` is set). Used after a hot-swap.
    pub fn set_active_session(&mut self, session: Arc<dyn Session>) {
        self.active_session = session;
    }

    /// Route and execute one request. Retries once on the next lower role on
    /// a transient failure; on a permanent failure or exhausted fallback,
    /// falls back to the process-wide `ActiveSessionSlot` session before
    /// giving up.
    pub async fn dispatch(
        &self,
        req: &SynthesizeRequest,
        complexity: f64,
    ) -> Result<SynthesisOutcome, InferenceError> {
        let preferred = Role::for_complexity(complexity);

        let Some((role, slot)) = self.pool.resolve(preferred) else {
            return self.dispatch_on_active_slot(req).await;
        };

        match self.run_with_timeout(&slot.session, req, &slot.counters).await {
            Ok((audio, duration)) => Ok(SynthesisOutcome {
                audio,
                role_used: role,
                provider_id: slot.session.provider_id().clone(),
                duration,
            }),
            Err(InferenceError::Transient { .. }) => {
                if let Some(fallback_role) = role.fallback() {
                    if let Some((used_role, fallback_slot)) = self.pool.resolve(fallback_role) {
                        let (audio, duration) = self
                            .run_with_timeout(&fallback_slot.session, req, &fallback_slot.counters)
                            .await?;
                        return Ok(SynthesisOutcome {
                            audio,
                            role_used: used_role,
                            provider_id: fallback_slot.session.provider_id().clone(),
                            duration,
                        });
                    }
                }
                self.dispatch_on_active_slot(req).await
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch_on_active_slot(
        &self,
        req: &SynthesizeRequest,
    ) -> Result<SynthesisOutcome, InferenceError> {
        let started = Instant::now();
        let audio = tokio::time::timeout(self.request_timeout, self.active_session.synthesize(req))
            .await
            .map_err(|_| InferenceError::Timeout {
                seconds: self.request_timeout.as_secs(),
            })??;
        Ok(SynthesisOutcome {
            audio,
            role_used: Role::Fast,
            provider_id: self.active_session.provider_id().clone(),
            duration: started.elapsed(),
        })
    }

    async fn run_with_timeout(
        &self,
        session: &Arc<dyn Session>,
        req: &SynthesizeRequest,
        counters: &RoleCounters,
    ) -> Result<(Vec<u8>, Duration), InferenceError> {
        counters.total.fetch_add(1, Ordering::Relaxed);
        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        counters.mark_used();
        let started = Instant::now();

        let result = tokio::time::timeout(self.request_timeout, session.synthesize(req)).await;

        counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        let elapsed = started.elapsed();

        match result {
            Err(_) => Err(InferenceError::Timeout {
                seconds: self.request_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(audio)) => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                counters
                    .cumulative_duration_ms
                    .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
                counters.record_latency(elapsed.as_secs_f64() * 1000.0);
                Ok((audio, elapsed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::session::StubSession;

    fn req(text: &str) -> SynthesizeRequest {
        SynthesizeRequest {
            text: text.to_string(),
            voice: "af_heart".to_string(),
            speed: 1.0,
            lang: "en-us".to_string(),
        }
    }

    #[test]
    fn routing_table_matches_spec_thresholds() {
        assert_eq!(Role::for_complexity(0.0), Role::Fast);
        assert_eq!(Role::for_complexity(0.32), Role::Fast);
        assert_eq!(Role::for_complexity(0.33), Role::Balanced);
        assert_eq!(Role::for_complexity(0.66), Role::Balanced);
        assert_eq!(Role::for_complexity(0.67), Role::Heavy);
        assert_eq!(Role::for_complexity(1.0), Role::Heavy);
    }

    #[tokio::test]
    async fn dispatch_falls_through_to_present_role() {
        let mut pool = SessionPool::new();
        pool.set(Role::Fast, Arc::new(StubSession::new(ProviderId::cpu())));
        let active = Arc::new(StubSession::new(ProviderId::cpu()));
        let scheduler = Scheduler::new(pool, active, Duration::from_secs(5));

        // complexity 0.9 prefers Heavy, which is absent -> falls through
        // Balanced (absent) -> Fast (present).
        let outcome = scheduler.dispatch(&req("hello"), 0.9).await.expect("should succeed");
        assert_eq!(outcome.role_used, Role::Fast);
    }

    #[tokio::test]
    async fn dispatch_retries_on_transient_failure() {
        let mut pool = SessionPool::new();
        let failing = StubSession::new(ProviderId::accelerator());
        let mut failing = failing;
        failing.fail_transiently = true;
        pool.set(Role::Heavy, Arc::new(failing));
        pool.set(Role::Balanced, Arc::new(StubSession::new(ProviderId::cpu())));
        let active = Arc::new(StubSession::new(ProviderId::cpu()));
        let scheduler = Scheduler::new(pool, active, Duration::from_secs(5));

        let outcome = scheduler.dispatch(&req("hello"), 0.9).await.expect("should fall back");
        assert_eq!(outcome.role_used, Role::Balanced);
    }

    #[tokio::test]
    async fn utilization_counters_increment_on_success() {
        let mut pool = SessionPool::new();
        pool.set(Role::Fast, Arc::new(StubSession::new(ProviderId::cpu())));
        let active = Arc::new(StubSession::new(ProviderId::cpu()));
        let scheduler = Scheduler::new(pool, active, Duration::from_secs(5));

        scheduler.dispatch(&req("hello"), 0.1).await.expect("should succeed");
        let util = scheduler.role_utilization(Role::Fast).expect("fast role present");
        assert_eq!(util.total, 1);
        assert_eq!(util.successes, 1);
    }

    #[tokio::test]
    async fn utilization_tracks_last_used_and_latency_ema() {
        let mut pool = SessionPool::new();
        pool.set(Role::Fast, Arc::new(StubSession::new(ProviderId::cpu())));
        let active = Arc::new(StubSession::new(ProviderId::cpu()));
        let scheduler = Scheduler::new(pool, active, Duration::from_secs(5));

        let before = util_now_ms();
        scheduler.dispatch(&req("hello"), 0.1).await.expect("should succeed");
        let util = scheduler.role_utilization(Role::Fast).expect("fast role present");

        assert!(util.last_used_unix_ms >= before);
        assert!(util.latency_ema_ms >= 0.0);

        scheduler.dispatch(&req("world"), 0.1).await.expect("should succeed");
        let util_after_second = scheduler.role_utilization(Role::Fast).expect("fast role present");
        assert!(util_after_second.last_used_unix_ms >= util.last_used_unix_ms);
    }

    fn util_now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
