// ARCHITECTURE: Security Gate - Rate Limiting, IP Reputation, Event Ledger
//
// Fixed-window rate limiting keyed by the authenticated subject when one is
// present, else by source IP, so authenticated abuse cannot rotate keys while
// anonymous traffic is still bounded per address. Repeated violations inside
// the window escalate the IP to suspicious; suspicious IPs are rejected
// outright by the blocked-IP middleware layer without consuming rate budget.
// Every rejection is recorded in a bounded per-IP event ledger feeding the
// operational stats snapshot.
//
// All state is process-local. A multi-instance deployment must back the
// counters, the suspicious set, and the ledger with a shared store exposing
// the same operations.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::LimitConfig;
use crate::error::{Error, PolicyViolation, Result};

/// Events retained per source IP; the oldest entry is evicted beyond this.
pub const MAX_EVENTS_PER_IP: usize = 100;
/// Events returned in a stats snapshot.
pub const RECENT_EVENTS_LIMIT: usize = 50;
/// Stats snapshots only consider events inside this horizon.
const RECENT_EVENTS_HORIZON_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimitExceeded,
    SuspiciousPattern,
    OversizedRequest,
    BlockedRequest,
    IpFlagged,
    AuthFailure,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventKind::SuspiciousPattern => "suspicious_pattern",
            SecurityEventKind::OversizedRequest => "oversized_request",
            SecurityEventKind::BlockedRequest => "blocked_request",
            SecurityEventKind::IpFlagged => "ip_flagged",
            SecurityEventKind::AuthFailure => "auth_failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub kind: SecurityEventKind,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub total_events: usize,
    pub suspicious_ip_count: usize,
    pub events_by_type: HashMap<String, u64>,
    pub recent_events: Vec<SecurityEvent>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GateMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rate_limited_requests: u64,
    pub blocked_requests: u64,
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

impl Window {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            count: 0,
        }
    }

    /// Resets the window if it has elapsed, then counts one hit and reports
    /// whether the count stayed within `max`.
    fn hit(&mut self, window: Duration, max: u32) -> bool {
        if self.start.elapsed() >= window {
            self.start = Instant::now();
            self.count = 0;
        }
        self.count += 1;
        self.count <= max
    }

    fn remaining(&self, window: Duration) -> Duration {
        window.saturating_sub(self.start.elapsed())
    }
}

pub struct SecurityGate {
    window: Duration,
    max_requests: u32,
    violation_threshold: u32,
    max_request_bytes: u64,
    counters: Arc<DashMap<String, Window>>,
    violations: Arc<DashMap<String, Window>>,
    suspicious: Arc<DashSet<String>>,
    events: Arc<RwLock<HashMap<String, VecDeque<SecurityEvent>>>>,
    metrics: Arc<RwLock<GateMetrics>>,
    cleanup_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl SecurityGate {
    pub fn new(limits: &LimitConfig) -> Result<Self> {
        Ok(Self {
            window: Duration::from_millis(limits.rate_limit_window_ms),
            max_requests: limits.rate_limit_max_requests,
            violation_threshold: limits.violation_threshold,
            max_request_bytes: parse_size(&limits.max_request_size)?,
            counters: Arc::new(DashMap::new()),
            violations: Arc::new(DashMap::new()),
            suspicious: Arc::new(DashSet::new()),
            events: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(GateMetrics::default())),
            cleanup_handle: Arc::new(RwLock::new(None)),
        })
    }

    /// LIFECYCLE: Start the background cleanup task.
    pub async fn start(&self) {
        self.start_cleanup_task().await;
        info!(
            window_ms = self.window.as_millis() as u64,
            max_requests = self.max_requests,
            violation_threshold = self.violation_threshold,
            "security gate started"
        );
    }

    /// LIFECYCLE: Stop background work.
    pub async fn stop(&self) {
        if let Some(handle) = self.cleanup_handle.write().await.take() {
            handle.abort();
        }
        info!("security gate stopped");
    }

    /// CORE FUNCTION: Fixed-window rate limit check. `key` is the subject id
    /// for authenticated traffic, else the source IP; `ip` is always the
    /// source address and is what accumulates violations.
    pub async fn check_rate_limit(&self, key: &str, ip: &str) -> RateLimitDecision {
        self.metrics.write().await.total_requests += 1;

        let (allowed, retry_after) = {
            let mut window = self
                .counters
                .entry(key.to_string())
                .or_insert_with(Window::new);
            let allowed = window.hit(self.window, self.max_requests);
            (allowed, window.remaining(self.window))
        };

        if allowed {
            self.metrics.write().await.allowed_requests += 1;
            return RateLimitDecision::Allowed;
        }

        self.metrics.write().await.rate_limited_requests += 1;
        self.record_event(
            ip,
            SecurityEventKind::RateLimitExceeded,
            format!("rate limit exceeded for key {key}"),
        )
        .await;
        self.register_violation(ip).await;

        RateLimitDecision::Limited {
            retry_after_secs: retry_after.as_secs().max(1),
        }
    }

    /// One policy violation for this IP inside the rolling window. Crossing
    /// the threshold flags the IP as suspicious; the flag is cleared only by
    /// process restart.
    async fn register_violation(&self, ip: &str) {
        let over_threshold = {
            let mut window = self
                .violations
                .entry(ip.to_string())
                .or_insert_with(Window::new);
            // hit() returns false once the count exceeds threshold - 1.
            !window.hit(self.window, self.violation_threshold.saturating_sub(1))
        };

        if over_threshold && self.suspicious.insert(ip.to_string()) {
            warn!(ip = %ip, "violation threshold crossed, flagging IP as suspicious");
            self.record_event(
                ip,
                SecurityEventKind::IpFlagged,
                format!("flagged after {} violations", self.violation_threshold),
            )
            .await;
        }
    }

    pub fn is_suspicious(&self, ip: &str) -> bool {
        self.suspicious.contains(ip)
    }

    /// Record the rejection of a request from a suspicious IP. The caller
    /// (the blocked-IP middleware layer) short-circuits without touching the
    /// rate-limit counters.
    pub async fn note_blocked(&self, ip: &str) {
        self.metrics.write().await.blocked_requests += 1;
        self.record_event(
            ip,
            SecurityEventKind::BlockedRequest,
            "request from suspicious IP rejected".to_string(),
        )
        .await;
    }

    /// Compare a declared Content-Length against the configured maximum.
    pub async fn check_request_size(&self, ip: &str, content_length: u64) -> Result<()> {
        if content_length <= self.max_request_bytes {
            return Ok(());
        }
        self.record_event(
            ip,
            SecurityEventKind::OversizedRequest,
            format!(
                "content length {content_length} exceeds limit {}",
                self.max_request_bytes
            ),
        )
        .await;
        Err(Error::Policy(PolicyViolation::OversizedRequest))
    }

    pub fn max_request_bytes(&self) -> u64 {
        self.max_request_bytes
    }

    /// Append to the per-IP ledger, evicting the oldest entry beyond the cap.
    pub async fn record_event(&self, ip: &str, kind: SecurityEventKind, details: String) {
        let event = SecurityEvent {
            timestamp: Utc::now(),
            source_ip: ip.to_string(),
            kind,
            details,
        };

        let mut events = self.events.write().await;
        let ledger = events.entry(ip.to_string()).or_default();
        if ledger.len() >= MAX_EVENTS_PER_IP {
            ledger.pop_front();
        }
        ledger.push_back(event);
    }

    /// Operational snapshot: totals, per-type counts, and the most recent
    /// events (newest first, bounded, within the 24h horizon).
    pub async fn stats(&self) -> SecurityStats {
        let events = self.events.read().await;

        let mut events_by_type: HashMap<String, u64> = HashMap::new();
        let mut total_events = 0;
        let horizon = Utc::now() - chrono::Duration::hours(RECENT_EVENTS_HORIZON_HOURS);
        let mut recent: Vec<SecurityEvent> = Vec::new();

        for ledger in events.values() {
            total_events += ledger.len();
            for event in ledger {
                *events_by_type
                    .entry(event.kind.as_str().to_string())
                    .or_default() += 1;
                if event.timestamp >= horizon {
                    recent.push(event.clone());
                }
            }
        }

        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(RECENT_EVENTS_LIMIT);

        SecurityStats {
            total_events,
            suspicious_ip_count: self.suspicious.len(),
            events_by_type,
            recent_events: recent,
        }
    }

    pub async fn metrics(&self) -> GateMetrics {
        self.metrics.read().await.clone()
    }

    async fn start_cleanup_task(&self) {
        let counters = Arc::clone(&self.counters);
        let violations = Arc::clone(&self.violations);
        let window = self.window;
        // Stale entries are harmless after one window; sweep every two.
        let sweep_interval = (window * 2).max(Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;

                let before = counters.len() + violations.len();
                counters.retain(|_, w| w.start.elapsed() < window * 2);
                violations.retain(|_, w| w.start.elapsed() < window * 2);
                let cleaned = before - (counters.len() + violations.len());

                if cleaned > 0 {
                    debug!(cleaned, "swept idle rate-limit windows");
                }
            }
        });

        *self.cleanup_handle.write().await = Some(handle);
    }
}

/// Parse a human request-size string ("10mb", "1.5 KB", "512") into bytes.
/// Units b/kb/mb/gb, case-insensitive; a bare number means bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_lowercase();
    let split_at = normalized
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split_at);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::Validation(format!("invalid size value: {input}")))?;

    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        other => {
            return Err(Error::Validation(format!("unknown size unit: {other}")));
        }
    };

    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(window_ms: u64, max_requests: u32, violation_threshold: u32) -> LimitConfig {
        LimitConfig {
            rate_limit_window_ms: window_ms,
            rate_limit_max_requests: max_requests,
            violation_threshold,
            max_request_size: "10mb".to_string(),
        }
    }

    #[tokio::test]
    async fn requests_within_limit_are_allowed() {
        let gate = SecurityGate::new(&limits(60_000, 5, 5)).unwrap();

        for _ in 0..5 {
            let decision = gate.check_rate_limit("u1", "1.2.3.4").await;
            assert_eq!(decision, RateLimitDecision::Allowed);
        }
    }

    #[tokio::test]
    async fn requests_over_limit_are_rejected_with_retry_hint() {
        let gate = SecurityGate::new(&limits(60_000, 2, 5)).unwrap();

        gate.check_rate_limit("u1", "1.2.3.4").await;
        gate.check_rate_limit("u1", "1.2.3.4").await;

        match gate.check_rate_limit("u1", "1.2.3.4").await {
            RateLimitDecision::Limited { retry_after_secs } => {
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let gate = SecurityGate::new(&limits(60_000, 1, 5)).unwrap();

        assert_eq!(
            gate.check_rate_limit("u1", "1.2.3.4").await,
            RateLimitDecision::Allowed
        );
        assert!(matches!(
            gate.check_rate_limit("u1", "1.2.3.4").await,
            RateLimitDecision::Limited { .. }
        ));
        // A different subject from the same IP still has budget.
        assert_eq!(
            gate.check_rate_limit("u2", "1.2.3.4").await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn window_resets_after_elapsing() {
        let gate = SecurityGate::new(&limits(50, 1, 100)).unwrap();

        assert_eq!(
            gate.check_rate_limit("u1", "1.2.3.4").await,
            RateLimitDecision::Allowed
        );
        assert!(matches!(
            gate.check_rate_limit("u1", "1.2.3.4").await,
            RateLimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            gate.check_rate_limit("u1", "1.2.3.4").await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn repeated_violations_flag_the_ip() {
        let gate = SecurityGate::new(&limits(60_000, 1, 3)).unwrap();
        let ip = "9.9.9.9";

        assert!(!gate.is_suspicious(ip));

        // First request consumes the budget, the next three are violations.
        for _ in 0..4 {
            gate.check_rate_limit(ip, ip).await;
        }

        assert!(gate.is_suspicious(ip));

        let stats = gate.stats().await;
        assert_eq!(stats.suspicious_ip_count, 1);
        assert_eq!(stats.events_by_type.get("ip_flagged"), Some(&1));
    }

    #[tokio::test]
    async fn oversized_requests_are_rejected_and_recorded() {
        let gate = SecurityGate::new(&limits(60_000, 100, 5)).unwrap();

        assert!(gate.check_request_size("1.2.3.4", 1024).await.is_ok());

        let over = gate.max_request_bytes() + 1;
        let result = gate.check_request_size("1.2.3.4", over).await;
        assert!(matches!(
            result,
            Err(Error::Policy(PolicyViolation::OversizedRequest))
        ));

        let stats = gate.stats().await;
        assert_eq!(stats.events_by_type.get("oversized_request"), Some(&1));
    }

    #[tokio::test]
    async fn per_ip_ledger_is_bounded() {
        let gate = SecurityGate::new(&limits(60_000, 100, 5)).unwrap();

        for i in 0..(MAX_EVENTS_PER_IP + 20) {
            gate.record_event(
                "1.2.3.4",
                SecurityEventKind::AuthFailure,
                format!("attempt {i}"),
            )
            .await;
        }

        let stats = gate.stats().await;
        assert_eq!(stats.total_events, MAX_EVENTS_PER_IP);
        // Oldest entries were evicted first.
        assert!(stats
            .recent_events
            .iter()
            .all(|e| !e.details.ends_with("attempt 0")));
    }

    #[tokio::test]
    async fn stats_are_newest_first_and_bounded() {
        let gate = SecurityGate::new(&limits(60_000, 100, 5)).unwrap();

        for i in 0..60 {
            gate.record_event(
                "1.2.3.4",
                SecurityEventKind::SuspiciousPattern,
                format!("event {i}"),
            )
            .await;
        }

        let stats = gate.stats().await;
        assert_eq!(stats.recent_events.len(), RECENT_EVENTS_LIMIT);
        for pair in stats.recent_events.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
        assert_eq!(stats.events_by_type.get("suspicious_pattern"), Some(&60));
    }

    #[test]
    fn parse_size_accepts_units_case_insensitively() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("512b").unwrap(), 512);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("1.5kb").unwrap(), 1536);
        assert_eq!(parse_size("10mb").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("10 MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("abc").is_err());
        assert!(parse_size("10tb").is_err());
        assert!(parse_size("").is_err());
    }
}
