//! HTTP surface (A4 in SPEC_FULL.md — ambient, not part of the core spec's
//! component list, but required to make the runtime reachable). Grounded on
//! the axum/tower-http router-building conventions used across the pack's
//! service crates: a thin `AppState`, one module per concern, correlation-id
//! middleware via `tower-http`'s `request-id` feature, and a `RuntimeError
//! -> StatusCode` mapping at the boundary.
//!
//! Request flow follows spec.md §2's data path: Ingress Gate (middleware,
//! below) -> Supervisor::dispatch (Scheduler + active Session) -> Streaming
//! Emitter -> client, with the TTFA Monitor finalized on both the streaming
//! and non-streaming paths.

use crate::error::RuntimeError;
use crate::provider::session::SynthesizeRequest;
use crate::streaming;
use crate::supervisor::Supervisor;
use crate::ttfa::Stage;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path as AxumPath, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub in_flight: Arc<AtomicU64>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/audio/speech", post(synthesize_speech))
        .route("/status", get(status))
        .route("/performance/ttfa", get(performance_ttfa))
        .route("/performance/clear_cache", post(clear_cache))
        .route("/performance/benchmark/{kind}", post(trigger_benchmark))
        .layer(middleware::from_fn_with_state(state.clone(), ingress_middleware))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the Ingress Gate (C11) ahead of every route. Requires the server to
/// be bound with `into_make_service_with_connect_info::<SocketAddr>()` so
/// `ConnectInfo` is available.
async fn ingress_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if let Err(refusal) = state.supervisor.ingress().check(addr.ip(), &path, &user_agent) {
        let reason = refusal.to_string();
        let status: StatusCode = RuntimeError::Ingress(refusal).into();
        let mut response = (status, Json(serde_json::json!({ "error": reason }))).into_response();
        if let Ok(value) = HeaderValue::from_str(&reason) {
            response.headers_mut().insert("X-Blocked-Reason", value);
        }
        return response;
    }

    next.run(req).await
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    text: String,
    voice: String,
    #[serde(default = "default_speed")]
    speed: f32,
    #[serde(default = "default_lang")]
    lang: String,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    #[allow(dead_code)]
    format: Option<String>,
}

fn default_speed() -> f32 {
    1.0
}

fn default_lang() -> String {
    "en-us".to_string()
}

impl From<RuntimeError> for StatusCode {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Ingress(crate::error::IngressRefusal::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            RuntimeError::Ingress(_) => StatusCode::FORBIDDEN,
            RuntimeError::Inference(crate::error::InferenceError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            RuntimeError::Inference(_) => StatusCode::BAD_GATEWAY,
            RuntimeError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            RuntimeError::SessionBuild(_) | RuntimeError::Provider(_) | RuntimeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

async fn synthesize_speech(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<SpeechRequest>,
) -> Response {
    let correlation_id = headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state.in_flight.fetch_add(1, Ordering::AcqRel);
    let result = handle_synthesize(&state, &req, &correlation_id).await;
    state.in_flight.fetch_sub(1, Ordering::AcqRel);

    match result {
        Ok(response) => response,
        Err(err) => {
            let status: StatusCode = err.into();
            let mut response = (status, Json(serde_json::json!({ "error": status.to_string() }))).into_response();
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                response.headers_mut().insert("X-Correlation-Id", value);
            }
            response
        }
    }
}

async fn handle_synthesize(
    state: &AppState,
    req: &SpeechRequest,
    correlation_id: &str,
) -> Result<Response, RuntimeError> {
    let synth_req = SynthesizeRequest {
        text: req.text.clone(),
        voice: req.voice.clone(),
        speed: req.speed,
        lang: req.lang.clone(),
    };

    let in_flight_concurrency = state.in_flight.load(Ordering::Acquire) as u32;
    let outcome = state
        .supervisor
        .dispatch(&synth_req, correlation_id, in_flight_concurrency)
        .await?;

    let provider_name = outcome.provider_id.name.clone();
    let role_used = outcome.role_used;
    let audio = outcome.audio;
    let mut timer = outcome.stage_timer;

    let mut response = if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let underrun_threshold = std::time::Duration::from_millis(state.supervisor.config().underrun_threshold_ms);
        let ttfa = state.supervisor.ttfa();
        tokio::spawn(async move {
            let report = streaming::emit_stream(tx, None, audio, underrun_threshold).await;
            if let Some(latency) = report.first_chunk_latency {
                timer.record_duration(Stage::FirstChunkDeliver, latency);
            }
            ttfa.finalize(timer);
        });
        let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|chunk| Ok::<_, std::io::Error>(chunk.data));
        Body::from_stream(stream).into_response()
    } else {
        timer.record_duration(Stage::FirstChunkDeliver, std::time::Duration::from_millis(0));
        state.supervisor.ttfa().finalize(timer);
        audio.into_response()
    };

    response.headers_mut().insert(
        "X-Provider-Used",
        HeaderValue::from_str(&provider_name).unwrap_or(HeaderValue::from_static("unknown")),
    );
    response.headers_mut().insert(
        "X-Role-Used",
        HeaderValue::from_str(&format!("{:?}", role_used)).unwrap_or(HeaderValue::from_static("unknown")),
    );
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert("X-Correlation-Id", value);
    }

    Ok(response)
}

#[derive(Debug, Serialize)]
struct TtfaSummary {
    p50: f64,
    p95: f64,
    p99: f64,
    target_achievement_rate: f64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    model_loaded: bool,
    active_provider: Option<String>,
    hardware: crate::hardware::HardwareProfile,
    providers: Vec<String>,
    warm_up_complete: bool,
    ttfa: TtfaSummary,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.supervisor.status();
    Json(StatusResponse {
        model_loaded: snapshot.model_loaded,
        active_provider: snapshot.active_provider.map(|p| p.name),
        hardware: snapshot.hardware,
        providers: snapshot.providers.into_iter().map(|p| p.name).collect(),
        warm_up_complete: snapshot.warm_up_complete,
        ttfa: TtfaSummary {
            p50: snapshot.ttfa.p50,
            p95: snapshot.ttfa.p95,
            p99: snapshot.ttfa.p99,
            target_achievement_rate: snapshot.ttfa.target_achievement_rate,
        },
    })
}

async fn performance_ttfa(State(state): State<AppState>) -> Json<TtfaSummary> {
    let stats = state.supervisor.ttfa().stats();
    Json(TtfaSummary {
        p50: stats.p50,
        p95: stats.p95,
        p99: stats.p99,
        target_achievement_rate: stats.target_achievement_rate,
    })
}

#[derive(Debug, Serialize)]
struct ClearCacheResponse {
    files_removed: usize,
}

async fn clear_cache(State(state): State<AppState>) -> Json<ClearCacheResponse> {
    let files_removed = state.supervisor.clear_caches();
    Json(ClearCacheResponse { files_removed })
}

async fn trigger_benchmark(State(state): State<AppState>, AxumPath(kind): AxumPath<String>) -> Json<serde_json::Value> {
    let report = state.supervisor.run_benchmark(&kind).await;
    Json(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rate_limited_to_too_many_requests() {
        let err = RuntimeError::Ingress(crate::error::IngressRefusal::RateLimited);
        let status: StatusCode = err.into();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn maps_other_ingress_refusals_to_forbidden() {
        let err = RuntimeError::Ingress(crate::error::IngressRefusal::MaliciousPattern);
        let status: StatusCode = err.into();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn maps_timeout_to_gateway_timeout() {
        let err = RuntimeError::Inference(crate::error::InferenceError::Timeout { seconds: 30 });
        let status: StatusCode = err.into();
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
