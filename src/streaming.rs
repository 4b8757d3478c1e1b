//! C10 — Streaming Emitter.
//!
//! Converts a Session's output into an ordered byte-chunk stream with an
//! optional primer chunk emitted first, and measures inter-chunk gaps for
//! underrun detection. Grounded on the teacher's audio pipeline's
//! producer/consumer channel shape (capture -> resampler -> consumer),
//! generalized from microphone frames to outbound synthesis chunks.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Target chunk size in bytes; the real vocoder would stream progressively,
/// the stand-in splits a whole-utterance buffer into fixed-size pieces.
const CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sequence: u64,
    pub data: Vec<u8>,
    pub is_primer: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GapSample {
    pub sequence: u64,
    pub gap: Duration,
    pub is_underrun: bool,
}

#[derive(Debug, Default, Clone)]
pub struct StreamReport {
    pub chunks_emitted: u64,
    pub first_chunk_latency: Option<Duration>,
    pub gaps: Vec<GapSample>,
    pub client_disconnected: bool,
}

/// Emits `audio` (and an optional `primer`) as an ordered sequence of chunks
/// over `tx`, measuring gaps as it goes. Stops promptly if the receiver is
/// dropped (client disconnect); the caller's synthesize future may continue
/// to completion regardless (spec.md §4.10 — no engine-level cancel).
pub async fn emit_stream(
    tx: mpsc::Sender<AudioChunk>,
    primer: Option<Vec<u8>>,
    audio: Vec<u8>,
    underrun_threshold: Duration,
) -> StreamReport {
    let mut report = StreamReport::default();
    let mut sequence = 0u64;
    let started = Instant::now();
    let mut last_emit: Option<Instant> = None;

    if let Some(primer_bytes) = primer {
        if tx
            .send(AudioChunk {
                sequence,
                data: primer_bytes,
                is_primer: true,
            })
            .await
            .is_err()
        {
            report.client_disconnected = true;
            return report;
        }
        report.chunks_emitted += 1;
        report.first_chunk_latency = Some(started.elapsed());
        last_emit = Some(Instant::now());
        sequence += 1;
    }

    for chunk_data in audio.chunks(CHUNK_BYTES) {
        let now = Instant::now();
        if report.first_chunk_latency.is_none() {
            report.first_chunk_latency = Some(started.elapsed());
        }
        if let Some(prev) = last_emit {
            let gap = now.duration_since(prev);
            report.gaps.push(GapSample {
                sequence,
                gap,
                is_underrun: gap > underrun_threshold,
            });
        }

        if tx
            .send(AudioChunk {
                sequence,
                data: chunk_data.to_vec(),
                is_primer: false,
            })
            .await
            .is_err()
        {
            report.client_disconnected = true;
            return report;
        }

        report.chunks_emitted += 1;
        last_emit = Some(Instant::now());
        sequence += 1;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let audio = vec![0u8; CHUNK_BYTES * 3 + 10];
        let handle = tokio::spawn(emit_stream(tx, None, audio, Duration::from_millis(50)));

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk.sequence);
        }
        let report = handle.await.unwrap();

        assert_eq!(received, (0..received.len() as u64).collect::<Vec<_>>());
        assert_eq!(report.chunks_emitted, 4);
        assert!(!report.client_disconnected);
    }

    #[tokio::test]
    async fn primer_is_emitted_first_with_sequence_zero() {
        let (tx, mut rx) = mpsc::channel(16);
        let audio = vec![1u8; CHUNK_BYTES];
        let handle = tokio::spawn(emit_stream(tx, Some(vec![9, 9, 9]), audio, Duration::from_millis(50)));

        let first = rx.recv().await.expect("primer chunk");
        assert!(first.is_primer);
        assert_eq!(first.sequence, 0);
        while rx.recv().await.is_some() {}
        let report = handle.await.unwrap();
        assert_eq!(report.chunks_emitted, 2);
    }

    #[tokio::test]
    async fn dropping_receiver_stops_emission_promptly() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let audio = vec![0u8; CHUNK_BYTES * 5];
        let report = emit_stream(tx, None, audio, Duration::from_millis(50)).await;
        assert!(report.client_disconnected);
    }
}
