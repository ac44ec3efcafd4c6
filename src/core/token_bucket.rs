use std::time::Instant;

/// Continuously refilling quota counter.
///
/// Tokens accrue at `refill_rate` per second up to `capacity`; each admitted
/// unit of work drains tokens. `0 <= tokens <= capacity` holds after every
/// refill and consume.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    /// Try to take `n` tokens. On failure the bucket is left as refilled.
    pub fn consume(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        // a clock reading older than the last refill counts as zero elapsed
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Tokens currently held, refilled up to `now`
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Tokens as of the last refill
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Change the refill rate. Tokens earned so far are credited at the old rate.
    pub fn set_refill_rate(&mut self, refill_rate: f64, now: Instant) {
        self.refill(now);
        self.refill_rate = refill_rate.max(0.0);
    }

    /// Change capacity and refill rate, clamping held tokens to the new capacity
    pub fn resize(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        self.refill(now);
        self.capacity = capacity.max(0.0);
        self.refill_rate = refill_rate.max(0.0);
        self.tokens = self.tokens.min(self.capacity);
    }
}
