#![allow(dead_code)]

use std::sync::Arc;

use novel_engine_admission::config::{DdosConfig, RateLimitConfig};
use novel_engine_admission::core::{MockClock, RateLimiter, RequestMeta};

pub const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Random address in the 198.18.0.0/15 benchmarking range, never whitelisted
pub fn random_ip() -> String {
    format!(
        "198.{}.{}.{}",
        18 + rand::random::<u8>() % 2,
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Well-formed browser request from `address`
pub fn browser(address: &str, path: &str) -> RequestMeta {
    RequestMeta::new(address, path)
        .with_user_agent(BROWSER_AGENT)
        .with_accept("text/html,application/json")
}

/// Limiter driven by a mock clock with the default flood threshold
pub fn limiter(config: RateLimitConfig) -> (RateLimiter, MockClock) {
    limiter_with_ddos(config, DdosConfig::default())
}

pub fn limiter_with_ddos(config: RateLimitConfig, ddos: DdosConfig) -> (RateLimiter, MockClock) {
    let clock = MockClock::starting_now();
    let limiter = RateLimiter::builder(config)
        .ddos(ddos)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("valid test configuration");
    (limiter, clock)
}

/// Flood threshold high enough that burst tests never trip it
pub fn lenient_ddos() -> DdosConfig {
    DdosConfig {
        threshold: 10_000,
        window_seconds: 60,
    }
}
