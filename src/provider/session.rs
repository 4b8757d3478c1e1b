//! The `Session` collaborator.
//!
//! The neural inference engine itself is out of scope for this runtime (see
//! spec.md §1); it is treated as an opaque collaborator behind a narrow
//! trait, the way the teacher treats `whisper-rs`/ONNX Runtime behind
//! `WhisperEngine`. Production builds would implement this trait over the
//! real vocoder; tests and warm-up use [`StubSession`], which produces
//! deterministic synthetic PCM the same way `WhisperEngine::run_whisper_transcription`
//! produces deterministic mock transcripts.

use crate::error::InferenceError;
use crate::provider::ProviderId;
use async_trait::async_trait;

/// Parameters for a single synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizeRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub lang: String,
}

/// A long-lived inference context bound to one provider, shared by many
/// concurrent requests. Implementations must be safe to call concurrently
/// for read-only inference (spec.md §3, `Session`).
#[async_trait]
pub trait Session: Send + Sync {
    async fn synthesize(&self, req: &SynthesizeRequest) -> Result<Vec<u8>, InferenceError>;

    fn provider_id(&self) -> &ProviderId;
}

/// Deterministic in-process stand-in for the real vocoder. Generates a
/// sine-derived PCM16 buffer whose length is proportional to text length,
/// so tests can assert on chunking/streaming behavior without a real model.
pub struct StubSession {
    provider_id: ProviderId,
    /// Artificial per-call latency, used to simulate provider performance
    /// differences in benchmark and hot-swap tests.
    pub simulated_latency: std::time::Duration,
    /// When true, every call returns a transient inference error; used to
    /// exercise the Scheduler's retry-on-lower-role path.
    pub fail_transiently: bool,
}

impl StubSession {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            simulated_latency: std::time::Duration::from_millis(0),
            fail_transiently: false,
        }
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.simulated_latency = latency;
        self
    }
}

#[async_trait]
impl Session for StubSession {
    async fn synthesize(&self, req: &SynthesizeRequest) -> Result<Vec<u8>, InferenceError> {
        if !self.simulated_latency.is_zero() {
            tokio::time::sleep(self.simulated_latency).await;
        }
        if self.fail_transiently {
            return Err(InferenceError::Transient {
                message: "stub session configured to fail".to_string(),
            });
        }
        if req.text.is_empty() {
            return Err(InferenceError::Permanent {
                message: "empty text".to_string(),
            });
        }

        // ~16kHz mono, 2 bytes/sample, ~12ms of audio per character.
        let sample_count = (req.text.len() as f32 * 0.012 * 16_000.0 / req.speed.max(0.1)) as usize;
        let mut pcm = Vec::with_capacity(sample_count.max(1) * 2);
        for i in 0..sample_count.max(1) {
            let t = i as f32 / 16_000.0;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.2;
            pcm.extend_from_slice(&(sample as i16).to_le_bytes());
        }
        Ok(pcm)
    }

    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }
}
