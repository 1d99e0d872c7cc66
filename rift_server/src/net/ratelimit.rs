//! A token bucket. Chat is limited per source address; the bucket refills
//! continuously and each message spends one token.

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
  capacity:    f64,
  tokens:      f64,
  refill_per_s: f64,
  last_refill: Instant,
}

impl TokenBucket {
  pub fn new(capacity: f64, refill_per_s: f64, now: Instant) -> Self {
    TokenBucket { capacity, tokens: capacity, refill_per_s, last_refill: now }
  }

  /// Takes one token if available.
  pub fn try_take(&mut self, now: Instant) -> bool {
    let elapsed = now.duration_since(self.last_refill).as_secs_f64();
    self.last_refill = now;
    self.tokens = (self.tokens + elapsed * self.refill_per_s).min(self.capacity);
    if self.tokens >= 1.0 {
      self.tokens -= 1.0;
      true
    } else {
      false
    }
  }
}
