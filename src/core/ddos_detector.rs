use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::DdosConfig;
use crate::utils::log_ddos_detection;

/// Outcome of [`DdosDetector::analyze`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdosVerdict {
    pub allowed: bool,
    /// Requests seen in the window, including this one
    pub request_count: usize,
    pub reason: Option<String>,
}

/// High-frequency volume guard.
///
/// Keeps a rolling window of request instants per identity, independent of the
/// tiered quotas, so floods spread across cheap endpoints are still caught.
/// Denied requests are recorded too: a sustained flood stays flagged.
#[derive(Debug)]
pub struct DdosDetector {
    threshold: usize,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl DdosDetector {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &DdosConfig) -> Self {
        Self::new(config.threshold as usize, config.window())
    }

    /// Record a request from `identity` and decide whether it is part of a flood
    pub fn analyze(&self, identity: &str, now: Instant) -> DdosVerdict {
        self.analyze_with_threshold(identity, self.threshold, now)
    }

    /// [`analyze`](Self::analyze) against a per-client threshold, such as
    /// one scaled by [`scaled_threshold`](Self::scaled_threshold)
    pub fn analyze_with_threshold(
        &self,
        identity: &str,
        threshold: usize,
        now: Instant,
    ) -> DdosVerdict {
        let request_count = {
            let mut timestamps = self.windows.entry(identity.to_string()).or_default();
            evict(&mut timestamps, now, self.window);
            timestamps.push_back(now);
            timestamps.len()
        };

        if request_count > threshold {
            log_ddos_detection(identity, request_count, threshold);
            return DdosVerdict {
                allowed: false,
                request_count,
                reason: Some(format!(
                    "{} requests in {}s exceeds threshold of {}",
                    request_count,
                    self.window.as_secs(),
                    threshold
                )),
            };
        }

        DdosVerdict {
            allowed: true,
            request_count,
            reason: None,
        }
    }

    /// Requests recorded for `identity` inside the window
    pub fn request_count(&self, identity: &str, now: Instant) -> usize {
        self.windows
            .get_mut(identity)
            .map(|mut timestamps| {
                evict(&mut timestamps, now, self.window);
                timestamps.len()
            })
            .unwrap_or(0)
    }

    /// Drop windows that no longer hold any request; returns how many were dropped
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            evict(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Threshold for a role whose quotas are scaled by `multiplier`
    pub fn scaled_threshold(&self, multiplier: f64) -> usize {
        ((self.threshold as f64 * multiplier).round() as usize).max(1)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = timestamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
