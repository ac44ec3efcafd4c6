//! Outbound port for admission events.
//!
//! The limiter reports allows, denials and threat elevations here; the
//! default [`TracingObserver`] turns them into structured log events and
//! Prometheus counters.

use super::decision::{DenyReason, TierRemaining};
use super::threat::{ThreatLevel, ThreatSignal};
use crate::utils::{log_admitted, log_denial, log_threat_elevation};

/// A refused request
#[derive(Debug, Clone, PartialEq)]
pub struct DenialEvent {
    pub identity: String,
    pub reason: DenyReason,
    /// Operator-facing explanation, including flood detail
    pub message: String,
    pub retry_after: Option<u64>,
    pub threat_level: ThreatLevel,
}

/// A client's threat level went up
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatEvent {
    pub identity: String,
    pub from: ThreatLevel,
    pub to: ThreatLevel,
    pub signals: Vec<ThreatSignal>,
}

#[cfg_attr(test, mockall::automock)]
pub trait AdmissionObserver: Send + Sync {
    fn on_allowed(&self, identity: &str, remaining: &TierRemaining);

    fn on_denied(&self, event: &DenialEvent);

    fn on_threat_elevated(&self, event: &ThreatEvent);

    fn on_clients_tracked(&self, _count: usize) {}
}

/// Logs through `tracing` and counts through `metrics`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AdmissionObserver for TracingObserver {
    fn on_allowed(&self, identity: &str, remaining: &TierRemaining) {
        log_admitted(identity, remaining.minute);
        metrics::counter!("admission_requests_total", "outcome" => "allowed").increment(1);
    }

    fn on_denied(&self, event: &DenialEvent) {
        log_denial(
            &event.identity,
            event.reason.code(),
            &event.message,
            event.retry_after,
            event.threat_level.as_str(),
        );
        metrics::counter!("admission_requests_total", "outcome" => "denied").increment(1);
        metrics::counter!("admission_denials_total", "reason" => event.reason.code()).increment(1);
    }

    fn on_threat_elevated(&self, event: &ThreatEvent) {
        let signals = event
            .signals
            .iter()
            .map(ThreatSignal::as_str)
            .collect::<Vec<_>>()
            .join(",");
        log_threat_elevation(&event.identity, event.from.as_str(), event.to.as_str(), &signals);
        metrics::counter!("admission_threat_elevations_total", "level" => event.to.as_str())
            .increment(1);
    }

    fn on_clients_tracked(&self, count: usize) {
        metrics::gauge!("admission_tracked_clients").set(count as f64);
    }
}
