//! Token bucket pacing for relay requests.
//!
//! One bucket is shared across all endpoints so the whole process stays under
//! the provider's request budget.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::trace;

/// Token bucket rate limiter.
///
/// Tokens are added at a constant rate and consumed per request. The bucket
/// starts full, allowing a burst up to the capacity.
pub struct TokenBucket {
    /// Max tokens (= requests per minute).
    capacity: f32,
    /// Current available tokens.
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Try to take a token.
    ///
    /// Returns `Err(wait_duration)` when empty, with the time until one token
    /// is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let wait_secs = tokens_needed / self.refill_rate;
            Err(Duration::from_secs_f32(wait_secs))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async wrapper that sleeps until a token is available.
pub struct RequestPacer {
    bucket: Mutex<TokenBucket>,
}

impl RequestPacer {
    /// Returns `None` for an unlimited budget.
    pub fn new(requests_per_minute: u32) -> Option<Self> {
        if requests_per_minute == 0 {
            return None;
        }
        Some(Self {
            bucket: Mutex::new(TokenBucket::new(requests_per_minute)),
        })
    }

    /// Waits for a token.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.bucket.lock().await.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            trace!("Relay pacing: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
