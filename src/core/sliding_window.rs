use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of [`SlidingWindow::check_rate_limit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    pub allowed: bool,
    /// Requests still admissible in the current window
    pub remaining: u32,
    /// Seconds until the oldest request leaves the window; 0 when allowed
    pub retry_after: u64,
}

/// Exact rolling-window counter.
///
/// Stores the instant of every admitted request, oldest first. Entries whose
/// age reaches the window length are evicted before each decision.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    max_requests: u32,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            timestamps: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit and record a request if the window has room
    pub fn can_proceed(&mut self, now: Instant) -> bool {
        self.check_rate_limit(now).allowed
    }

    /// Like [`can_proceed`](Self::can_proceed) but reports remaining room and retry delay
    pub fn check_rate_limit(&mut self, now: Instant) -> WindowCheck {
        self.evict(now);

        let count = self.timestamps.len() as u32;
        if count < self.max_requests {
            self.timestamps.push_back(now);
            return WindowCheck {
                allowed: true,
                remaining: self.max_requests - count - 1,
                retry_after: 0,
            };
        }

        let retry_after = self
            .timestamps
            .front()
            .map(|&oldest| {
                let age = now.saturating_duration_since(oldest);
                self.window.saturating_sub(age).as_secs() + 1
            })
            .unwrap_or(1);

        WindowCheck {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Requests recorded inside the window as of `now`
    pub fn count(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.timestamps.len()
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
