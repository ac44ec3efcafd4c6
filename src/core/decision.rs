use serde::Serialize;
use thiserror::Error;

use super::client_state::Tier;
use super::threat::ThreatLevel;

/// Whole tokens left per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierRemaining {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
}

/// Why a request was refused.
///
/// These are expected outcomes reported to the caller, not faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("address is blacklisted")]
    Blacklisted,

    #[error("client is temporarily blocked")]
    TemporarilyBlocked,

    #[error("request volume flagged as a flood: {detail}")]
    DdosFlagged { detail: String },

    #[error("{tier} quota exceeded")]
    TierExceeded { tier: Tier },

    #[error("endpoint limit exceeded for {endpoint}")]
    EndpointOverrideExceeded { endpoint: String },

    #[error("global request capacity exceeded")]
    GlobalCapacityExceeded,
}

impl DenyReason {
    /// Stable machine-readable code for logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Blacklisted => "blacklisted",
            DenyReason::TemporarilyBlocked => "temporarily_blocked",
            DenyReason::DdosFlagged { .. } => "ddos_flagged",
            DenyReason::TierExceeded { tier: Tier::Minute } => "tier_exceeded_minute",
            DenyReason::TierExceeded { tier: Tier::Hour } => "tier_exceeded_hour",
            DenyReason::TierExceeded { tier: Tier::Day } => "tier_exceeded_day",
            DenyReason::EndpointOverrideExceeded { .. } => "endpoint_override_exceeded",
            DenyReason::GlobalCapacityExceeded => "global_capacity_exceeded",
        }
    }

    /// Access refusals as opposed to throttling
    pub fn is_forbidden(&self) -> bool {
        matches!(self, DenyReason::Blacklisted | DenyReason::TemporarilyBlocked)
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: TierRemaining,
    /// Seconds the caller should wait; set on denials
    pub retry_after: Option<u64>,
    pub threat_level: ThreatLevel,
    pub reason: Option<DenyReason>,
    /// Minute-tier capacity for the client's role, when known
    pub limit: Option<u64>,
}

impl RateDecision {
    pub fn allow(remaining: TierRemaining, threat_level: ThreatLevel, limit: Option<u64>) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            threat_level,
            reason: None,
            limit,
        }
    }

    pub fn deny(
        reason: DenyReason,
        retry_after: u64,
        remaining: TierRemaining,
        threat_level: ThreatLevel,
        limit: Option<u64>,
    ) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after: Some(retry_after),
            threat_level,
            reason: Some(reason),
            limit,
        }
    }

    /// Human-readable outcome for operator logs
    pub fn reason_text(&self) -> String {
        match &self.reason {
            Some(reason) => reason.to_string(),
            None => "allowed".to_string(),
        }
    }
}
