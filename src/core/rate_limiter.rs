use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::client_state::{ClientSnapshot, ClientState, Tier, TierQuotas};
use super::clock::{Clock, SystemClock};
use super::ddos_detector::DdosDetector;
use super::decision::{DenyReason, RateDecision, TierRemaining};
use super::global_throttle::GlobalThrottle;
use super::identity::{ClientIdentity, RequestMeta};
use super::ip_lists::{IpBlacklist, IpWhitelist};
use super::observer::{AdmissionObserver, DenialEvent, ThreatEvent, TracingObserver};
use super::threat::{ThreatDetector, ThreatLevel, ThreatSignal};
use crate::config::{DdosConfig, EvictionConfig, RateLimitConfig, Settings, ThreatConfig};
use crate::utils::{log_eviction, AdmissionResult};

/// Builder for [`RateLimiter`]
pub struct RateLimiterBuilder {
    config: RateLimitConfig,
    ddos: DdosConfig,
    threat: ThreatConfig,
    eviction: EvictionConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AdmissionObserver>,
}

impl RateLimiterBuilder {
    pub fn ddos(mut self, ddos: DdosConfig) -> Self {
        self.ddos = ddos;
        self
    }

    pub fn threat(mut self, threat: ThreatConfig) -> Self {
        self.threat = threat;
        self
    }

    pub fn eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AdmissionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and assemble the limiter
    pub fn build(self) -> AdmissionResult<RateLimiter> {
        self.config.validate()?;
        self.ddos.validate()?;
        self.threat.validate()?;
        self.eviction.validate()?;

        Ok(RateLimiter {
            whitelist: IpWhitelist::new(&self.config.whitelist_addresses),
            blacklist: IpBlacklist::from_addresses(&self.config.blacklist_addresses),
            global: GlobalThrottle::from_config(&self.config),
            detector: ThreatDetector::new(self.threat),
            ddos: DdosDetector::from_config(&self.ddos),
            idle_timeout: self.eviction.idle_timeout(),
            config: self.config,
            clients: DashMap::new(),
            clock: self.clock,
            observer: self.observer,
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        })
    }
}

/// Counters exposed to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub tracked_clients: usize,
    pub allowed: u64,
    pub denied: u64,
    pub blacklisted: usize,
    pub ddos_windows: usize,
}

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub clients: usize,
    pub ddos_windows: usize,
    pub blacklist_entries: usize,
}

/// Adaptive, threat-aware admission controller.
///
/// Composes the override lists, the flood guard, behavioral threat scoring
/// and per-client token buckets into a single [`RateDecision`] per request.
/// Per-client state sits behind its own mutex so checks for different
/// clients never contend; the client map only locks a shard on insert.
pub struct RateLimiter {
    config: RateLimitConfig,
    whitelist: IpWhitelist,
    blacklist: IpBlacklist,
    global: Option<GlobalThrottle>,
    detector: ThreatDetector,
    ddos: DdosDetector,
    idle_timeout: Duration,
    clients: DashMap<String, Arc<Mutex<ClientState>>>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AdmissionObserver>,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    pub fn builder(config: RateLimitConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            ddos: DdosConfig::default(),
            threat: ThreatConfig::default(),
            eviction: EvictionConfig::default(),
            clock: Arc::new(SystemClock::new()),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Limiter with default flood, threat and eviction settings
    pub fn new(config: RateLimitConfig) -> AdmissionResult<Self> {
        Self::builder(config).build()
    }

    pub fn from_settings(settings: &Settings) -> AdmissionResult<Self> {
        Self::builder(settings.rate_limit.clone())
            .ddos(settings.ddos.clone())
            .threat(settings.threat.clone())
            .eviction(settings.eviction.clone())
            .build()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Resolve the identity from `meta` and run the admission check
    pub fn check_request(&self, meta: &RequestMeta) -> RateDecision {
        let identity = ClientIdentity::from_meta(meta);
        self.check(&identity, meta.role(), &meta.path, meta)
    }

    /// Decide whether `identity` may proceed.
    ///
    /// Precedence: blacklist, whitelist, active block, flood guard, global
    /// ceiling, then endpoint override and the minute, hour and day tiers.
    pub fn check(
        &self,
        identity: &ClientIdentity,
        role: &str,
        endpoint: &str,
        meta: &RequestMeta,
    ) -> RateDecision {
        let now = self.clock.now();
        let quotas = self.quotas_for(role);
        let limit = Some(quotas.minute.capacity.floor() as u64);

        if let Some(entry) = self.blacklist.lookup(identity.address(), now) {
            let retry_after = entry
                .expires_at
                .map_or(self.config.blacklist_retry_after_secs, |expiry| {
                    ceil_secs(expiry.saturating_duration_since(now))
                });
            return self.deny(
                identity,
                DenyReason::Blacklisted,
                retry_after,
                TierRemaining::default(),
                entry.severity,
                limit,
            );
        }

        if self.whitelist.is_whitelisted(identity.address()) {
            return self.admit(identity, quotas.full(), ThreatLevel::BASELINE, limit);
        }

        loop {
            let handle = self.client_handle(identity, role, quotas, now);
            let mut state = handle.lock();
            // lost a race with the sweeper; fetch the replacement
            if state.is_evicted() {
                drop(state);
                self.clients
                    .remove_if(identity.key(), |_, current| Arc::ptr_eq(current, &handle));
                continue;
            }
            if state.role() != role {
                state.reassign_role(role, quotas, now);
                if self.config.adaptive_enabled {
                    state.apply_adaptive_scaling(now);
                }
            }
            return self.evaluate(&mut state, identity, endpoint, meta, now, limit);
        }
    }

    fn evaluate(
        &self,
        state: &mut ClientState,
        identity: &ClientIdentity,
        endpoint: &str,
        meta: &RequestMeta,
        now: Instant,
        limit: Option<u64>,
    ) -> RateDecision {
        if let Some(blocked_for) = state.block_remaining(now) {
            let remaining = state.remaining(now);
            return self.deny(
                identity,
                DenyReason::TemporarilyBlocked,
                ceil_secs(blocked_for),
                remaining,
                state.threat_level(),
                limit,
            );
        }

        let threshold = self
            .ddos
            .scaled_threshold(self.config.role_multiplier(state.role()));
        let verdict = self.ddos.analyze_with_threshold(identity.key(), threshold, now);
        if !verdict.allowed {
            // still active traffic; keeps the sweeper away while the flood lasts
            state.touch(now);
            self.escalate(state, identity, ThreatLevel::Critical, vec![ThreatSignal::Flooding], now);
            let remaining = state.remaining(now);
            return self.deny(
                identity,
                DenyReason::DdosFlagged {
                    detail: verdict.reason.unwrap_or_default(),
                },
                self.ddos.window().as_secs().max(1),
                remaining,
                state.threat_level(),
                limit,
            );
        }

        if let Some(global) = &self.global {
            if let Err(wait) = global.check() {
                state.touch(now);
                let remaining = state.remaining(now);
                return self.deny(
                    identity,
                    DenyReason::GlobalCapacityExceeded,
                    ceil_secs(wait),
                    remaining,
                    state.threat_level(),
                    limit,
                );
            }
        }

        // detection alone slows the client down; it never rejects this request
        let assessment = self.detector.assess(state, meta, now);
        self.escalate(state, identity, assessment.level, assessment.signals, now);

        if let Some((prefix, endpoint_limit)) = self.config.endpoint_override(endpoint) {
            let window = state.endpoint_window(prefix, endpoint_limit).check_rate_limit(now);
            if !window.allowed {
                let remaining = state.remaining(now);
                return self.deny(
                    identity,
                    DenyReason::EndpointOverrideExceeded {
                        endpoint: prefix.to_string(),
                    },
                    window.retry_after,
                    remaining,
                    state.threat_level(),
                    limit,
                );
            }
        }

        // tiers are independent counters; an earlier tier's token is not returned
        for tier in Tier::ALL {
            if !state.bucket_mut(tier).consume(1.0, now) {
                let remaining = state.remaining(now);
                return self.deny(
                    identity,
                    DenyReason::TierExceeded { tier },
                    tier.retry_after_secs(),
                    remaining,
                    state.threat_level(),
                    limit,
                );
            }
        }

        state.record_admitted();
        let remaining = state.remaining(now);
        self.admit(identity, remaining, state.threat_level(), limit)
    }

    fn escalate(
        &self,
        state: &mut ClientState,
        identity: &ClientIdentity,
        level: ThreatLevel,
        signals: Vec<ThreatSignal>,
        now: Instant,
    ) {
        if let Some(previous) = state.raise_threat(level) {
            self.observer.on_threat_elevated(&ThreatEvent {
                identity: identity.key().to_string(),
                from: previous,
                to: state.threat_level(),
                signals,
            });
        }

        if self.config.adaptive_enabled {
            if level == ThreatLevel::Critical {
                state.block_until(now + self.config.critical_block());
            }
            state.apply_adaptive_scaling(now);
        }
    }

    fn client_handle(
        &self,
        identity: &ClientIdentity,
        role: &str,
        quotas: TierQuotas,
        now: Instant,
    ) -> Arc<Mutex<ClientState>> {
        if let Some(existing) = self.clients.get(identity.key()) {
            return Arc::clone(existing.value());
        }

        let handle = Arc::clone(
            self.clients
                .entry(identity.key().to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ClientState::new(identity.key(), role, quotas, now)))
                })
                .value(),
        );
        self.observer.on_clients_tracked(self.clients.len());
        handle
    }

    fn existing_handle(&self, identity_key: &str) -> Option<Arc<Mutex<ClientState>>> {
        self.clients
            .get(identity_key)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn quotas_for(&self, role: &str) -> TierQuotas {
        TierQuotas::for_multiplier(&self.config, self.config.role_multiplier(role))
    }

    fn admit(
        &self,
        identity: &ClientIdentity,
        remaining: TierRemaining,
        threat_level: ThreatLevel,
        limit: Option<u64>,
    ) -> RateDecision {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.observer.on_allowed(identity.key(), &remaining);
        RateDecision::allow(remaining, threat_level, limit)
    }

    fn deny(
        &self,
        identity: &ClientIdentity,
        reason: DenyReason,
        retry_after: u64,
        remaining: TierRemaining,
        threat_level: ThreatLevel,
        limit: Option<u64>,
    ) -> RateDecision {
        self.denied.fetch_add(1, Ordering::Relaxed);
        let decision =
            RateDecision::deny(reason.clone(), retry_after, remaining, threat_level, limit);
        self.observer.on_denied(&DenialEvent {
            identity: identity.key().to_string(),
            reason,
            message: decision.reason_text(),
            retry_after: decision.retry_after,
            threat_level,
        });
        decision
    }

    /// Report how an admitted request turned out; failures feed the error-rate heuristic
    pub fn record_outcome(&self, identity_key: &str, success: bool) {
        if success {
            return;
        }
        if let Some(handle) = self.existing_handle(identity_key) {
            handle.lock().record_failure();
        }
    }

    /// Block `address` for `ttl`, or until removed when `ttl` is `None`
    pub fn blacklist(
        &self,
        address: &str,
        severity: ThreatLevel,
        ttl: Option<Duration>,
        reason: &str,
    ) {
        tracing::warn!(
            address = %address,
            severity = %severity,
            ttl_secs = ?ttl.map(|ttl| ttl.as_secs()),
            reason = %reason,
            event = "address_blacklisted"
        );
        self.blacklist
            .add(address, severity, ttl, reason, self.clock.now());
    }

    pub fn unblacklist(&self, address: &str) -> bool {
        let removed = self.blacklist.remove(address);
        if removed {
            tracing::info!(address = %address, event = "address_unblacklisted");
        }
        removed
    }

    /// Lift an active critical block for one client
    pub fn unblock(&self, identity_key: &str) -> bool {
        match self.existing_handle(identity_key) {
            Some(handle) => {
                handle.lock().clear_block();
                tracing::info!(identity = %identity_key, event = "client_unblocked");
                true
            }
            None => false,
        }
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelist.is_whitelisted(address)
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklist.is_blacklisted(address, self.clock.now())
    }

    pub fn client_snapshot(&self, identity_key: &str) -> Option<ClientSnapshot> {
        let now = self.clock.now();
        self.existing_handle(identity_key)
            .map(|handle| handle.lock().snapshot(now))
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            tracked_clients: self.clients.len(),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            blacklisted: self.blacklist.len(),
            ddos_windows: self.ddos.tracked(),
        }
    }

    /// Drop idle clients, empty flood windows and expired blacklist entries.
    ///
    /// A client is only removed while its lock is free, and is marked evicted
    /// under that lock so a concurrent check retries with fresh state.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let idle_timeout = self.idle_timeout;
        let mut clients = 0;

        self.clients.retain(|_, handle| match handle.try_lock() {
            Some(mut state) if state.is_idle(now, idle_timeout) => {
                state.mark_evicted();
                clients += 1;
                false
            }
            _ => true,
        });

        let report = SweepReport {
            clients,
            ddos_windows: self.ddos.sweep(now),
            blacklist_entries: self.blacklist.sweep_expired(now),
        };
        self.observer.on_clients_tracked(self.clients.len());

        if report != SweepReport::default() {
            log_eviction(report.clients, report.ddos_windows, report.blacklist_entries);
        }
        report
    }
}

/// Whole seconds, rounded up, at least one
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}
