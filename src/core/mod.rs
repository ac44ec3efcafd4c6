//! Core functionality for the admission controller.
//! This module contains the quota primitives, threat scoring,
//! flood detection, address lists and the limiter that composes them.

mod client_state;
mod clock;
mod ddos_detector;
mod decision;
mod eviction;
mod global_throttle;
mod identity;
mod ip_lists;
mod observer;
mod rate_limiter;
mod sliding_window;
mod threat;
mod token_bucket;

pub use client_state::{ClientSnapshot, ClientState, Tier, TierQuota, TierQuotas};
pub use clock::{Clock, MockClock, SystemClock};
pub use ddos_detector::{DdosDetector, DdosVerdict};
pub use decision::{DenyReason, RateDecision, TierRemaining};
pub use eviction::{EvictionHandle, EvictionWorker};
pub use global_throttle::GlobalThrottle;
pub use identity::{ClientIdentity, RequestMeta};
pub use ip_lists::{BlacklistEntry, IpBlacklist, IpWhitelist};
pub use observer::{AdmissionObserver, DenialEvent, ThreatEvent, TracingObserver};
pub use rate_limiter::{LimiterStats, RateLimiter, RateLimiterBuilder, SweepReport};
pub use sliding_window::{SlidingWindow, WindowCheck};
pub use threat::{elevate, ThreatAssessment, ThreatDetector, ThreatLevel, ThreatSignal};
pub use token_bucket::TokenBucket;
