//! Concrete end-to-end scenarios from spec.md §8: malicious-path refusal
//! with a subsequent block, and rate-limit enforcement within a 60s window.

use kokoro_runtime::ingress::{IngressGate, IngressGateConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

fn gate(per_minute_limit: u32, suspicious_threshold: u32) -> IngressGate {
    IngressGate::new(IngressGateConfig {
        localhost_only: true,
        per_minute_limit,
        per_hour_limit: 1000,
        suspicious_threshold,
        block_duration: Duration::from_secs(60 * 60),
        benchmark_user_agent_exempt: true,
    })
}

/// Scenario 3: malicious path refusal, then a subsequent legitimate request
/// from the same IP is refused once the IP is blocked.
#[test]
fn malicious_path_then_block_refuses_legitimate_followup() {
    let gate = gate(60, 1);
    let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

    let first = gate.check(ip, "/etc/passwd", "curl/8.0");
    assert!(first.is_err());

    // Threshold of 1 means this single suspicious hit already blocks the IP.
    let followup = gate.check(ip, "/v1/audio/speech", "curl/8.0");
    assert!(followup.is_err());
}

/// Scenario 4: 70 identical requests from 127.0.0.1 within the per-minute
/// window; the first `per_minute_limit` succeed, the rest are refused.
#[test]
fn rate_limit_enforcement_allows_exactly_the_configured_quota() {
    let gate = gate(60, 1000);
    let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

    let mut successes = 0;
    let mut refusals = 0;
    for _ in 0..70 {
        match gate.check(ip, "/v1/audio/speech", "curl/8.0") {
            Ok(()) => successes += 1,
            Err(_) => refusals += 1,
        }
    }

    assert_eq!(successes, 60);
    assert_eq!(refusals, 10);
}

#[test]
fn non_local_requests_are_refused_when_localhost_only() {
    let gate = gate(60, 1000);
    let public_ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    assert!(gate.check(public_ip, "/status", "curl/8.0").is_err());
}
