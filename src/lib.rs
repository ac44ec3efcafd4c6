//! Adaptive rate limiting and threat-aware admission control.
//!
//! [`RateLimiter`](crate::core::RateLimiter) decides per request whether a client may proceed,
//! combining address lists, flood detection, behavioral threat scoring and
//! tiered token buckets. [`AdmissionLayer`](crate::middleware::AdmissionLayer) puts it in front of
//! an axum router.

pub mod config;
pub mod core;
pub mod middleware;
pub mod utils;
