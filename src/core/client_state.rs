use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use super::decision::TierRemaining;
use super::sliding_window::SlidingWindow;
use super::threat::{ThreatLevel, ThreatSignal};
use super::token_bucket::TokenBucket;
use crate::config::{EndpointLimit, RateLimitConfig};

/// Quota period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minute,
    Hour,
    Day,
}

impl Tier {
    /// Consumption order
    pub const ALL: [Tier; 3] = [Tier::Minute, Tier::Hour, Tier::Day];

    /// Retry-After reported when this tier runs dry
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Tier::Minute => 60,
            Tier::Hour => 3600,
            Tier::Day => 86400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Minute => "minute",
            Tier::Hour => "hour",
            Tier::Day => "day",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity and base refill rate of one tier's bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierQuota {
    pub capacity: f64,
    /// Tokens per second before adaptive scaling
    pub refill_rate: f64,
}

/// Quotas for all three tiers of one role
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierQuotas {
    pub minute: TierQuota,
    pub hour: TierQuota,
    pub day: TierQuota,
}

impl TierQuotas {
    /// Quotas for a role with the given multiplier.
    ///
    /// The minute bucket holds `max(burst_size, requests_per_minute)` tokens so
    /// the configured burst is always available on top of the steady rate.
    pub fn for_multiplier(config: &RateLimitConfig, multiplier: f64) -> Self {
        let per_minute = f64::from(config.requests_per_minute) * multiplier;
        let per_hour = f64::from(config.requests_per_hour) * multiplier;
        let per_day = f64::from(config.requests_per_day) * multiplier;
        let minute_capacity =
            f64::from(config.burst_size.max(config.requests_per_minute)) * multiplier;

        Self {
            minute: TierQuota {
                capacity: minute_capacity,
                refill_rate: per_minute / 60.0,
            },
            hour: TierQuota {
                capacity: per_hour,
                refill_rate: per_hour / 3600.0,
            },
            day: TierQuota {
                capacity: per_day,
                refill_rate: per_day / 86400.0,
            },
        }
    }

    /// Same capacity and rate on every tier
    pub fn uniform(capacity: f64, refill_rate: f64) -> Self {
        let quota = TierQuota {
            capacity,
            refill_rate,
        };
        Self {
            minute: quota,
            hour: quota,
            day: quota,
        }
    }

    pub fn get(&self, tier: Tier) -> TierQuota {
        match tier {
            Tier::Minute => self.minute,
            Tier::Hour => self.hour,
            Tier::Day => self.day,
        }
    }

    /// Full capacities, floored
    pub fn full(&self) -> TierRemaining {
        TierRemaining {
            minute: self.minute.capacity.floor() as u64,
            hour: self.hour.capacity.floor() as u64,
            day: self.day.capacity.floor() as u64,
        }
    }
}

/// Everything the limiter knows about one client identity.
///
/// Guarded by its own mutex inside the limiter; every method assumes the
/// caller holds that lock.
#[derive(Debug)]
pub struct ClientState {
    identity: String,
    role: String,
    quotas: TierQuotas,
    threat_level: ThreatLevel,
    minute_bucket: TokenBucket,
    hour_bucket: TokenBucket,
    day_bucket: TokenBucket,
    total_requests: u64,
    failed_requests: u64,
    first_seen: Instant,
    last_request_time: Instant,
    suspicious_patterns: HashMap<ThreatSignal, u32>,
    blocked_until: Option<Instant>,
    endpoint_windows: HashMap<String, SlidingWindow>,
    evicted: bool,
}

impl ClientState {
    pub fn new(
        identity: impl Into<String>,
        role: impl Into<String>,
        quotas: TierQuotas,
        now: Instant,
    ) -> Self {
        let bucket = |quota: TierQuota| TokenBucket::new(quota.capacity, quota.refill_rate, now);
        Self {
            identity: identity.into(),
            role: role.into(),
            quotas,
            threat_level: ThreatLevel::BASELINE,
            minute_bucket: bucket(quotas.minute),
            hour_bucket: bucket(quotas.hour),
            day_bucket: bucket(quotas.day),
            total_requests: 0,
            failed_requests: 0,
            first_seen: now,
            // counts the first request of a fresh burst as rapid
            last_request_time: now,
            suspicious_patterns: HashMap::new(),
            blocked_until: None,
            endpoint_windows: HashMap::new(),
            evicted: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn quotas(&self) -> &TierQuotas {
        &self.quotas
    }

    /// Switch to another role's quotas, keeping earned tokens up to the new capacities
    pub fn reassign_role(&mut self, role: &str, quotas: TierQuotas, now: Instant) {
        self.role = role.to_string();
        self.quotas = quotas;
        for tier in Tier::ALL {
            let quota = quotas.get(tier);
            self.bucket_mut(tier)
                .resize(quota.capacity, quota.refill_rate, now);
        }
    }

    pub fn threat_level(&self) -> ThreatLevel {
        self.threat_level
    }

    /// Raise the threat level; returns the previous level when it changed
    pub fn raise_threat(&mut self, level: ThreatLevel) -> Option<ThreatLevel> {
        let previous = self.threat_level;
        self.threat_level = previous.elevate(level);
        (self.threat_level != previous).then_some(previous)
    }

    /// Scale minute and hour refill by the current threat level
    pub fn apply_adaptive_scaling(&mut self, now: Instant) {
        let factor = self.threat_level.refill_factor();
        let minute_rate = self.quotas.minute.refill_rate * factor;
        let hour_rate = self.quotas.hour.refill_rate * factor;
        self.minute_bucket.set_refill_rate(minute_rate, now);
        self.hour_bucket.set_refill_rate(hour_rate, now);
    }

    pub fn bucket(&self, tier: Tier) -> &TokenBucket {
        match tier {
            Tier::Minute => &self.minute_bucket,
            Tier::Hour => &self.hour_bucket,
            Tier::Day => &self.day_bucket,
        }
    }

    pub fn bucket_mut(&mut self, tier: Tier) -> &mut TokenBucket {
        match tier {
            Tier::Minute => &mut self.minute_bucket,
            Tier::Hour => &mut self.hour_bucket,
            Tier::Day => &mut self.day_bucket,
        }
    }

    /// Floor of the tokens left in each tier
    pub fn remaining(&mut self, now: Instant) -> TierRemaining {
        TierRemaining {
            minute: self.minute_bucket.available(now).floor() as u64,
            hour: self.hour_bucket.available(now).floor() as u64,
            day: self.day_bucket.available(now).floor() as u64,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn record_admitted(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_requests += 1;
    }

    /// Lifetime ratio of failed to admitted requests
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn last_request_time(&self) -> Instant {
        self.last_request_time
    }

    pub fn touch(&mut self, now: Instant) {
        if now > self.last_request_time {
            self.last_request_time = now;
        }
    }

    /// Bump the counter for `signal`, returning the new count
    pub fn record_suspicion(&mut self, signal: ThreatSignal) -> u32 {
        let count = self.suspicious_patterns.entry(signal).or_insert(0);
        *count += 1;
        *count
    }

    pub fn suspicion_count(&self, signal: ThreatSignal) -> u32 {
        self.suspicious_patterns.get(&signal).copied().unwrap_or(0)
    }

    pub fn block_until(&mut self, until: Instant) {
        self.blocked_until = Some(self.blocked_until.map_or(until, |current| current.max(until)));
    }

    pub fn clear_block(&mut self) {
        self.blocked_until = None;
    }

    /// Time left on an active block
    pub fn block_remaining(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Sliding window for an endpoint override, created on first use
    pub fn endpoint_window(&mut self, prefix: &str, limit: &EndpointLimit) -> &mut SlidingWindow {
        self.endpoint_windows
            .entry(prefix.to_string())
            .or_insert_with(|| SlidingWindow::new(limit.window(), limit.requests))
    }

    /// No traffic for longer than `timeout` and no active block
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        self.block_remaining(now).is_none()
            && now.saturating_duration_since(self.last_request_time) > timeout
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn snapshot(&mut self, now: Instant) -> ClientSnapshot {
        ClientSnapshot {
            identity: self.identity.clone(),
            role: self.role.clone(),
            threat_level: self.threat_level,
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            remaining: self.remaining(now),
            minute_refill_rate: self.minute_bucket.refill_rate(),
            hour_refill_rate: self.hour_bucket.refill_rate(),
            day_refill_rate: self.day_bucket.refill_rate(),
            suspicious_patterns: self
                .suspicious_patterns
                .iter()
                .map(|(signal, count)| (signal.as_str(), *count))
                .collect(),
            blocked_for_secs: self.block_remaining(now).map(|d| d.as_secs()),
            age_secs: now.saturating_duration_since(self.first_seen).as_secs(),
        }
    }
}

/// Read-only view of a client's state for operators and tests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub identity: String,
    pub role: String,
    pub threat_level: ThreatLevel,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub remaining: TierRemaining,
    pub minute_refill_rate: f64,
    pub hour_refill_rate: f64,
    pub day_refill_rate: f64,
    pub suspicious_patterns: HashMap<&'static str, u32>,
    pub blocked_for_secs: Option<u64>,
    pub age_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotas_scale_with_multiplier() {
        let config = RateLimitConfig::default();
        let guest = TierQuotas::for_multiplier(&config, 1.0);
        let admin = TierQuotas::for_multiplier(&config, 10.0);

        assert_eq!(guest.minute.capacity, 60.0);
        assert_eq!(guest.minute.refill_rate, 1.0);
        assert_eq!(admin.minute.capacity, 600.0);
        assert_eq!(admin.hour.capacity, 10000.0);
        assert_eq!(admin.day.capacity, 100000.0);
    }

    #[test]
    fn test_burst_floor_on_minute_capacity() {
        let config = RateLimitConfig {
            requests_per_minute: 5,
            burst_size: 20,
            ..RateLimitConfig::default()
        };
        let quotas = TierQuotas::for_multiplier(&config, 2.0);
        assert_eq!(quotas.minute.capacity, 40.0);
        assert_eq!(quotas.minute.refill_rate, 10.0 / 60.0);
    }

    #[test]
    fn test_adaptive_scaling_is_idempotent() {
        let now = Instant::now();
        let quotas = TierQuotas::uniform(60.0, 1.0);
        let mut state = ClientState::new("id", "guest", quotas, now);

        state.raise_threat(ThreatLevel::High);
        state.apply_adaptive_scaling(now);
        state.apply_adaptive_scaling(now);
        assert_eq!(state.bucket(Tier::Minute).refill_rate(), 0.5);
        assert_eq!(state.bucket(Tier::Hour).refill_rate(), 0.5);
        assert_eq!(state.bucket(Tier::Day).refill_rate(), 1.0);

        state.raise_threat(ThreatLevel::Critical);
        state.apply_adaptive_scaling(now);
        assert!((state.bucket(Tier::Minute).refill_rate() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_raise_threat_never_lowers() {
        let now = Instant::now();
        let mut state = ClientState::new("id", "guest", TierQuotas::uniform(1.0, 1.0), now);

        assert_eq!(state.raise_threat(ThreatLevel::High), Some(ThreatLevel::Low));
        assert_eq!(state.raise_threat(ThreatLevel::Medium), None);
        assert_eq!(state.threat_level(), ThreatLevel::High);
    }

    #[test]
    fn test_block_and_idle() {
        let start = Instant::now();
        let mut state = ClientState::new("id", "guest", TierQuotas::uniform(1.0, 1.0), start);
        let hour = Duration::from_secs(3600);

        state.block_until(start + Duration::from_secs(300));
        assert_eq!(
            state.block_remaining(start + Duration::from_secs(100)),
            Some(Duration::from_secs(200))
        );
        assert!(state.block_remaining(start + Duration::from_secs(300)).is_none());

        assert!(!state.is_idle(start + Duration::from_secs(1800), hour));
        assert!(state.is_idle(start + Duration::from_secs(3601), hour));

        state.touch(start + Duration::from_secs(3000));
        assert!(!state.is_idle(start + Duration::from_secs(3601), hour));
    }

    #[test]
    fn test_reassign_role_resizes_buckets() {
        let now = Instant::now();
        let config = RateLimitConfig::default();
        let mut state = ClientState::new(
            "id",
            "guest",
            TierQuotas::for_multiplier(&config, 1.0),
            now,
        );
        assert!(state.bucket_mut(Tier::Minute).consume(50.0, now));

        state.reassign_role("admin", TierQuotas::for_multiplier(&config, 10.0), now);
        assert_eq!(state.role(), "admin");
        assert_eq!(state.bucket(Tier::Minute).capacity(), 600.0);
        assert_eq!(state.bucket(Tier::Minute).tokens(), 10.0);
    }
}
