//! Token-bucket rate limiter, one bucket per content source.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Classical token bucket. `tokens` is fractional; callers that find the
/// bucket empty sleep exactly long enough for one token to accrue.
///
/// Acquire and refill run under one lock per bucket. A caller cancelled
/// mid-wait deducts nothing: the deduction happens only after the sleep
/// completes.
pub struct TokenBucket {
    rate: f64,
    period: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate` requests per `period`.
    pub fn new(rate: u32, period: Duration) -> Self {
        Self {
            rate: rate as f64,
            period: period.as_secs_f64(),
            state: Mutex::new(BucketState { tokens: rate as f64, last_refill: Instant::now() }),
        }
    }

    /// Wait for and consume one token.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;

        state.tokens = (state.tokens + elapsed * self.rate / self.period).min(self.rate);

        if state.tokens < 1.0 {
            let wait = (1.0 - state.tokens) * self.period / self.rate;
            tracing::debug!("Rate limit reached, sleeping for {:.2}s", wait);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            state.tokens = 1.0;
        }

        state.tokens -= 1.0;
    }

    /// Current token count; refills lazily, consumes nothing.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.rate / self.period).min(self.rate);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_out_calls_past_the_burst() {
        let bucket = TokenBucket::new(1, Duration::from_secs(1));

        let start = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        bucket.acquire().await;

        // Calls 2 and 3 each wait a full period
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_rate_is_free() {
        let bucket = TokenBucket::new(5, Duration::from_secs(1));

        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_while_idle() {
        let bucket = TokenBucket::new(2, Duration::from_secs(1));
        bucket.acquire().await;
        bucket.acquire().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bucket.available().await >= 1.9);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_consumes_nothing() {
        let bucket = TokenBucket::new(1, Duration::from_secs(10));
        bucket.acquire().await;

        // Second acquire would sleep ~10s; drop it after 1s
        let waited = tokio::time::timeout(Duration::from_secs(1), bucket.acquire()).await;
        assert!(waited.is_err());

        // The abandoned waiter must not have consumed the accruing token
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(bucket.available().await >= 0.9);
    }
}
