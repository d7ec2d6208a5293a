use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

/// Snapshot of a limiter's internal state, exposed for stats/tests.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterState {
    pub tokens: f64,
    pub last_refill: Instant,
    pub total_requests: u64,
    pub total_retries: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    total_requests: u64,
    total_retries: u64,
}

/// Per-provider-client token bucket. One instance per provider, never
/// shared across providers, so each backs off independently.
///
/// `acquire` suspends the caller until a token is available; no request is
/// ever rejected here, only delayed.
pub struct RateLimiter {
    burst: f64,
    /// Time to accumulate one token.
    refill_interval: Duration,
    bucket: tokio::sync::Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let rps = requests_per_second.max(0.001);
        Self {
            burst: f64::from(burst.max(1)),
            refill_interval: Duration::from_secs_f64(1.0 / rps),
            bucket: tokio::sync::Mutex::new(Bucket {
                tokens: f64::from(burst.max(1)),
                last_refill: Instant::now(),
                total_requests: 0,
                total_retries: 0,
            }),
        }
    }

    fn refill(&self, b: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(b.last_refill);
        let gained = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
        if gained > 0.0 {
            b.tokens = (b.tokens + gained).min(self.burst);
            b.last_refill = now;
        }
    }

    /// Take one token, waiting as long as needed for it to accumulate.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut b = self.bucket.lock().await;
                self.refill(&mut b, Instant::now());
                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    b.total_requests += 1;
                    None
                } else {
                    let missing = 1.0 - b.tokens;
                    Some(self.refill_interval.mul_f64(missing))
                }
            };
            match wait {
                None => return,
                Some(d) => {
                    debug!(wait_ms = d.as_millis() as u64, "rate limiter: waiting for token");
                    tokio::time::sleep(d).await;
                }
            }
        }
    }

    /// Called when the provider answered with a rate-limit response. Zeroes
    /// the bucket so the next `acquire` waits a full refill interval.
    pub async fn on_rate_limited(&self) {
        let mut b = self.bucket.lock().await;
        b.tokens = 0.0;
        b.last_refill = Instant::now();
        b.total_retries += 1;
    }

    pub async fn state(&self) -> RateLimiterState {
        let b = self.bucket.lock().await;
        RateLimiterState {
            tokens: b.tokens,
            last_refill: b.last_refill,
            total_requests: b.total_requests,
            total_retries: b.total_retries,
        }
    }
}

/// Exponential backoff schedule used by provider retry loops around
/// outbound requests: `2^attempt * 1s` plus up to one second of jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = 1000u64.saturating_mul(1u64 << attempt.min(10));
        let jitter_ms = rand::thread_rng().gen_range(0..1000);
        Duration::from_millis(base_ms + jitter_ms)
    }
}
