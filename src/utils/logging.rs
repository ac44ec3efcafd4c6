use std::env;
use tracing_subscriber::{
    fmt::{format::FmtSpan, time::ChronoUtc},
    EnvFilter,
};

use super::error::{AdmissionError, AdmissionResult};

/// Initialize the logging system with the level taken from `RUST_LOG`
pub fn init_logging() -> AdmissionResult<()> {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .with_timer(ChronoUtc::rfc_3339())
        .try_init()
        .map_err(|e| AdmissionError::Logging(e.to_string()))
}

/// Create a new span for tracking request context
pub fn create_request_span(request_id: &str, identity: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
        identity = %identity,
        timestamp = %chrono::Utc::now()
    )
}

/// Log an admission denial
pub fn log_denial(
    identity: &str,
    reason: &str,
    message: &str,
    retry_after: Option<u64>,
    threat_level: &str,
) {
    tracing::warn!(
        identity = %identity,
        reason = %reason,
        message = %message,
        retry_after = ?retry_after,
        threat_level = %threat_level,
        event = "admission_denied",
        timestamp = %chrono::Utc::now()
    );
}

/// Log an admitted request
pub fn log_admitted(identity: &str, minute_remaining: u64) {
    tracing::debug!(
        identity = %identity,
        minute_remaining = %minute_remaining,
        event = "admission_allowed",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a threat level change for a client
pub fn log_threat_elevation(identity: &str, from: &str, to: &str, signals: &str) {
    tracing::warn!(
        identity = %identity,
        from = %from,
        to = %to,
        signals = %signals,
        event = "threat_elevated",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a DDoS detection event
pub fn log_ddos_detection(identity: &str, request_count: usize, threshold: usize) {
    tracing::error!(
        identity = %identity,
        request_count = %request_count,
        threshold = %threshold,
        event = "ddos_detected",
        timestamp = %chrono::Utc::now()
    );
}

/// Log the result of an idle-state sweep
pub fn log_eviction(clients: usize, ddos_windows: usize, blacklist_entries: usize) {
    tracing::info!(
        clients = %clients,
        ddos_windows = %ddos_windows,
        blacklist_entries = %blacklist_entries,
        event = "state_evicted",
        timestamp = %chrono::Utc::now()
    );
}
