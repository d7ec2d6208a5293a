use std::time::Duration;

use polytone::ratelimit::RateLimiter;
use tokio::time::Instant;

// Wall-clock based, so the intervals are kept small and the assertions
// generous.

#[tokio::test]
async fn exhausted_burst_delays_the_next_acquire() {
    // 20 tokens/s: one token every 50ms, burst of 2.
    let rl = RateLimiter::new(20.0, 2);
    rl.acquire().await;
    rl.acquire().await;

    let start = Instant::now();
    rl.acquire().await;
    let waited = start.elapsed();
    assert!(
        waited >= Duration::from_millis(30),
        "expected a refill wait, got {:?}",
        waited
    );
    assert!(waited < Duration::from_millis(500));
}

#[tokio::test]
async fn provider_rate_limit_response_forces_a_full_interval_wait() {
    let rl = RateLimiter::new(20.0, 5);
    rl.acquire().await;
    // Provider said 429: the bucket zeroes even though tokens remained.
    rl.on_rate_limited().await;

    let start = Instant::now();
    rl.acquire().await;
    let waited = start.elapsed();
    assert!(
        waited >= Duration::from_millis(40),
        "expected a full-interval wait, got {:?}",
        waited
    );

    let st = rl.state().await;
    assert_eq!(st.total_requests, 2);
    assert_eq!(st.total_retries, 1);
}

#[tokio::test]
async fn suspension_never_rejects() {
    // Tiny bucket, many acquires: every call eventually returns.
    let rl = RateLimiter::new(100.0, 1);
    for _ in 0..5 {
        rl.acquire().await;
    }
    let st = rl.state().await;
    assert_eq!(st.total_requests, 5);
}
