//! Behavioral threat scoring.
//!
//! Each request is run through a set of independent heuristics. Every
//! heuristic that fires contributes a [`ThreatLevel`]; the results are folded
//! with [`elevate`], so the most severe signal wins.

use serde::Serialize;
use std::fmt;
use std::time::Instant;

use super::client_state::ClientState;
use super::identity::RequestMeta;
use crate::config::ThreatConfig;

/// Severity classification, ordered `Low < Medium < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Level of a client nothing suspicious is known about
    pub const BASELINE: ThreatLevel = ThreatLevel::Low;

    /// The more severe of `self` and `other`
    pub fn elevate(self, other: ThreatLevel) -> ThreatLevel {
        self.max(other)
    }

    /// Multiplier applied to minute and hour refill rates under adaptive enforcement
    pub fn refill_factor(self) -> f64 {
        match self {
            ThreatLevel::Low | ThreatLevel::Medium => 1.0,
            ThreatLevel::High => 0.5,
            ThreatLevel::Critical => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-function form of [`ThreatLevel::elevate`]
pub fn elevate(a: ThreatLevel, b: ThreatLevel) -> ThreatLevel {
    a.elevate(b)
}

/// Heuristic that fired during an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatSignal {
    RapidRequests,
    MissingUserAgent,
    MissingAccept,
    HighErrorRate,
    SensitivePath,
    Flooding,
}

impl ThreatSignal {
    pub fn level(&self) -> ThreatLevel {
        match self {
            ThreatSignal::MissingUserAgent | ThreatSignal::MissingAccept => ThreatLevel::Medium,
            ThreatSignal::RapidRequests
            | ThreatSignal::HighErrorRate
            | ThreatSignal::SensitivePath => ThreatLevel::High,
            ThreatSignal::Flooding => ThreatLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatSignal::RapidRequests => "rapid_requests",
            ThreatSignal::MissingUserAgent => "missing_user_agent",
            ThreatSignal::MissingAccept => "missing_accept",
            ThreatSignal::HighErrorRate => "high_error_rate",
            ThreatSignal::SensitivePath => "sensitive_path",
            ThreatSignal::Flooding => "flooding",
        }
    }
}

/// Result of evaluating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub signals: Vec<ThreatSignal>,
}

impl ThreatAssessment {
    fn baseline() -> Self {
        Self {
            level: ThreatLevel::BASELINE,
            signals: Vec::new(),
        }
    }

    fn raise(&mut self, signal: ThreatSignal) {
        self.level = self.level.elevate(signal.level());
        self.signals.push(signal);
    }
}

/// Runs the request heuristics against a client's state
#[derive(Debug, Clone)]
pub struct ThreatDetector {
    config: ThreatConfig,
}

impl ThreatDetector {
    pub fn new(config: ThreatConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    /// Evaluate `meta` for the client owning `state`.
    ///
    /// Updates the client's suspicion counters and last request time.
    pub fn assess(&self, state: &mut ClientState, meta: &RequestMeta, now: Instant) -> ThreatAssessment {
        let mut assessment = ThreatAssessment::baseline();

        let since_last = now.saturating_duration_since(state.last_request_time());
        if since_last < self.config.rapid_interval() {
            let rapid = state.record_suspicion(ThreatSignal::RapidRequests);
            if rapid > self.config.rapid_threshold {
                assessment.raise(ThreatSignal::RapidRequests);
            }
        }

        let user_agent_len = meta.user_agent.as_deref().map_or(0, |ua| ua.trim().len());
        if user_agent_len < self.config.min_user_agent_len {
            state.record_suspicion(ThreatSignal::MissingUserAgent);
            assessment.raise(ThreatSignal::MissingUserAgent);
        }

        if meta.accept.as_deref().map_or(true, |accept| accept.trim().is_empty()) {
            state.record_suspicion(ThreatSignal::MissingAccept);
            assessment.raise(ThreatSignal::MissingAccept);
        }

        if state.total_requests() >= self.config.error_rate_min_requests
            && state.error_rate() > self.config.error_rate_threshold
        {
            state.record_suspicion(ThreatSignal::HighErrorRate);
            assessment.raise(ThreatSignal::HighErrorRate);
        }

        if self.is_sensitive_path(&meta.path) {
            state.record_suspicion(ThreatSignal::SensitivePath);
            assessment.raise(ThreatSignal::SensitivePath);
        }

        state.touch(now);
        assessment
    }

    fn is_sensitive_path(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        self.config
            .sensitive_paths
            .iter()
            .any(|pattern| path.contains(&pattern.to_ascii_lowercase()))
    }
}
