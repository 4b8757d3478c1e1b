//! Error kinds for every runtime subsystem.
//!
//! One `thiserror` enum per subsystem, mirroring how the original ASR/
//! diarization split kept error types close to the module that raises them.
//! `RuntimeError` is the boundary type the HTTP layer converts to a status
//! code.

use thiserror::Error;

/// Hardware probing never fails the process; this exists for completeness
/// and for callers that want to distinguish "probed" from "defaulted".
#[derive(Debug, Error)]
pub enum HardwareProbeError {
    #[error("hardware probe could not determine {field}, using conservative default")]
    DetectionFailed { field: &'static str },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no inference provider is available (CPU provider must always be present)")]
    ProviderUnavailable,
    #[error("provider {provider} failed validation: {message}")]
    ValidationFailed { provider: String, message: String },
}

#[derive(Debug, Error)]
pub enum SessionBuildError {
    #[error("failed to build session for provider {provider}: {source}")]
    Failed {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("inference failed (transient): {message}")]
    Transient { message: String },
    #[error("inference failed (permanent): {message}")]
    Permanent { message: String },
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file corrupt or checksum mismatch: {reason}")]
    Corruption { reason: String },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngressRefusal {
    #[error("non-local access is not permitted")]
    NonLocalAccess,
    #[error("source is blocked: {reason}")]
    AccessDenied { reason: String },
    #[error("request matched a malicious pattern")]
    MaliciousPattern,
    #[error("rate limit exceeded")]
    RateLimited,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("hot-swap failed: {message}")]
    Failed { message: String },
    #[error("benchmarking paused after {failures} consecutive swap failures")]
    Paused { failures: u32 },
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("drain timed out with {in_flight} requests still in flight")]
    TimedOut { in_flight: usize },
}

/// Top-level error the HTTP layer maps to a status code.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Ingress(#[from] IngressRefusal),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("model not ready")]
    NotReady,
    #[error(transparent)]
    SessionBuild(#[from] SessionBuildError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
