//! C11 — Ingress Security & Rate-Limit Gate.
//!
//! Five-stage per-request pipeline: source check, deny list, pattern
//! filter, token-bucket rate limit, suspicious-marking. Grounded on the
//! teacher's per-IP sharded-mutex accounting shape, generalized from audio
//! device permission bookkeeping to request-rate accounting.

use crate::error::IngressRefusal;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

const MALICIOUS_PATH_MARKERS: [&str; 10] = [
    "../", "..\\", "/etc/passwd", "/admin", "/.env", "/shell", "/cgi-bin", "' OR '1'='1", "<script", "UNION SELECT",
];

const PENTEST_USER_AGENTS: [&str; 5] = ["sqlmap", "nikto", "nmap", "masscan", "metasploit"];

fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn matches_malicious_pattern(path: &str, user_agent: &str) -> bool {
    let path_lower = path.to_ascii_lowercase();
    let ua_lower = user_agent.to_ascii_lowercase();
    MALICIOUS_PATH_MARKERS
        .iter()
        .any(|marker| path_lower.contains(&marker.to_ascii_lowercase()))
        || PENTEST_USER_AGENTS.iter().any(|tool| ua_lower.contains(tool))
}

struct ClientRecord {
    request_timestamps: VecDeque<Instant>,
    suspicious_count: u32,
    blocked_until: Option<SystemTime>,
}

impl ClientRecord {
    fn new() -> Self {
        Self {
            request_timestamps: VecDeque::new(),
            suspicious_count: 0,
            blocked_until: None,
        }
    }

    fn sweep(&mut self, window: Duration) {
        let cutoff = Instant::now().checked_sub(window);
        if let Some(cutoff) = cutoff {
            while let Some(&front) = self.request_timestamps.front() {
                if front < cutoff {
                    self.request_timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}

pub struct IngressGateConfig {
    pub localhost_only: bool,
    pub per_minute_limit: u32,
    pub per_hour_limit: u32,
    pub suspicious_threshold: u32,
    pub block_duration: Duration,
    pub benchmark_user_agent_exempt: bool,
}

/// Per-IP request accounting plus a static deny list. Single mutex per the
/// whole map; entries are cheap enough (a bounded ring plus a few scalars)
/// that lock hold time stays O(1) amortized as spec.md §4.11 requires.
pub struct IngressGate {
    config: IngressGateConfig,
    records: Mutex<HashMap<IpAddr, ClientRecord>>,
    deny_list: Mutex<std::collections::HashSet<IpAddr>>,
}

impl IngressGate {
    pub fn new(config: IngressGateConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            deny_list: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn deny(&self, ip: IpAddr) {
        self.deny_list.lock().expect("deny list mutex poisoned").insert(ip);
    }

    /// Run the full pipeline for one request. Returns `Ok(())` if admitted.
    pub fn check(
        &self,
        ip: IpAddr,
        path: &str,
        user_agent: &str,
    ) -> Result<(), IngressRefusal> {
        if self.config.localhost_only && !is_private_or_loopback(ip) {
            return Err(IngressRefusal::NonLocalAccess);
        }

        if self.deny_list.lock().expect("deny list mutex poisoned").contains(&ip) {
            return Err(IngressRefusal::AccessDenied {
                reason: "IP is on the static deny list".to_string(),
            });
        }

        let mut records = self.records.lock().expect("ingress records mutex poisoned");
        let record = records.entry(ip).or_insert_with(ClientRecord::new);

        if let Some(blocked_until) = record.blocked_until {
            if SystemTime::now() < blocked_until {
                return Err(IngressRefusal::AccessDenied {
                    reason: "IP is temporarily blocked".to_string(),
                });
            }
            record.blocked_until = None;
            record.suspicious_count = 0;
        }

        if matches_malicious_pattern(path, user_agent) {
            record.suspicious_count += 1;
            self.maybe_block(record);
            return Err(IngressRefusal::MaliciousPattern);
        }

        let exempt = self.config.benchmark_user_agent_exempt && user_agent.to_ascii_lowercase().contains("benchmark");
        if !exempt {
            record.sweep(Duration::from_secs(3600));
            let now = Instant::now();
            let per_minute = record
                .request_timestamps
                .iter()
                .filter(|&&t| now.duration_since(t) <= Duration::from_secs(60))
                .count() as u32;
            let per_hour = record.request_timestamps.len() as u32;

            if per_minute >= self.config.per_minute_limit || per_hour >= self.config.per_hour_limit {
                record.suspicious_count += 1;
                self.maybe_block(record);
                return Err(IngressRefusal::RateLimited);
            }

            record.request_timestamps.push_back(now);
            if record.request_timestamps.len() as u32 > self.config.per_hour_limit {
                record.request_timestamps.pop_front();
            }
        }

        Ok(())
    }

    fn maybe_block(&self, record: &mut ClientRecord) {
        if record.suspicious_count >= self.config.suspicious_threshold {
            record.blocked_until = Some(SystemTime::now() + self.config.block_duration);
            tracing::warn!(suspicious_count = record.suspicious_count, "client blocked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config() -> IngressGateConfig {
        IngressGateConfig {
            localhost_only: true,
            per_minute_limit: 3,
            per_hour_limit: 100,
            suspicious_threshold: 2,
            block_duration: Duration::from_secs(3600),
            benchmark_user_agent_exempt: true,
        }
    }

    #[test]
    fn non_local_access_refused_when_localhost_only() {
        let gate = IngressGate::new(config());
        let public_ip = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(
            gate.check(public_ip, "/v1/audio/speech", "curl/8.0"),
            Err(IngressRefusal::NonLocalAccess)
        );
    }

    #[test]
    fn loopback_admitted() {
        let gate = IngressGate::new(config());
        let loopback = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert!(gate.check(loopback, "/v1/audio/speech", "curl/8.0").is_ok());
    }

    #[test]
    fn malicious_pattern_refused_and_marks_suspicious() {
        let gate = IngressGate::new(config());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(
            gate.check(ip, "/../etc/passwd", "curl/8.0"),
            Err(IngressRefusal::MaliciousPattern)
        );
    }

    #[test]
    fn pentest_user_agent_refused() {
        let gate = IngressGate::new(config());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(
            gate.check(ip, "/status", "sqlmap/1.7"),
            Err(IngressRefusal::MaliciousPattern)
        );
    }

    #[test]
    fn rate_limit_enforced_after_per_minute_threshold() {
        let gate = IngressGate::new(config());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        for _ in 0..3 {
            assert!(gate.check(ip, "/v1/audio/speech", "curl/8.0").is_ok());
        }
        assert_eq!(
            gate.check(ip, "/v1/audio/speech", "curl/8.0"),
            Err(IngressRefusal::RateLimited)
        );
    }

    #[test]
    fn repeated_suspicious_events_trigger_block() {
        let gate = IngressGate::new(config());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let _ = gate.check(ip, "/../etc/passwd", "curl/8.0");
        let _ = gate.check(ip, "/../etc/passwd", "curl/8.0");
        assert_eq!(
            gate.check(ip, "/status", "curl/8.0"),
            Err(IngressRefusal::AccessDenied {
                reason: "IP is temporarily blocked".to_string()
            })
        );
    }

    #[test]
    fn benchmark_user_agent_is_rate_limit_exempt() {
        let gate = IngressGate::new(config());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        for _ in 0..10 {
            assert!(gate.check(ip, "/v1/audio/speech", "internal-benchmark-runner").is_ok());
        }
    }
}
