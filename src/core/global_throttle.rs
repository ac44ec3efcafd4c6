use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::RateLimitConfig;

/// Process-wide request ceiling (GCRA), applied across all identities
pub struct GlobalThrottle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
    per_second: NonZeroU32,
    burst: NonZeroU32,
}

impl GlobalThrottle {
    pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            per_second,
            burst,
        }
    }

    /// `None` when no ceiling is configured
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        let per_second = NonZeroU32::new(config.global_requests_per_second?)?;
        let burst = config
            .global_burst
            .and_then(NonZeroU32::new)
            .unwrap_or(per_second);
        Some(Self::new(per_second, burst))
    }

    /// Take one cell; on failure returns how long until one is available
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl fmt::Debug for GlobalThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalThrottle")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .finish()
    }
}
