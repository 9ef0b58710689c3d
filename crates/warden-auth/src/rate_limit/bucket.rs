//! Per-entity rate limit buckets.
//!
//! Every method takes `now` explicitly; the limiter supplies the clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Shared contract of the two limiting strategies.
pub trait LimitStrategy {
    /// Consume one unit. Returns false when the bucket is exhausted.
    fn take(&mut self, now: Instant) -> bool;

    /// Return to full capacity.
    fn reset(&mut self, now: Instant);

    /// Units that could be consumed right now.
    fn remaining(&self, now: Instant) -> u32;

    /// Time until one more unit becomes available, if currently exhausted.
    fn retry_after(&self, now: Instant) -> Option<Duration>;

    /// True when the bucket holds no debt and can be dropped.
    fn is_idle(&self, now: Instant) -> bool;
}

/// Fixed-window attempt counter.
///
/// Admits an attempt while fewer than `max_attempts` admitted attempts fall
/// inside `[now - window, now]`. Rejected attempts are not recorded.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    max_attempts: u32,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl FixedWindow {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: VecDeque::with_capacity(max_attempts.min(64) as usize),
        }
    }

    fn in_window(&self, now: Instant) -> impl Iterator<Item = &Instant> {
        let window = self.window;
        self.attempts
            .iter()
            .filter(move |at| now.saturating_duration_since(**at) <= window)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.attempts.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}

impl LimitStrategy for FixedWindow {
    fn take(&mut self, now: Instant) -> bool {
        self.prune(now);

        if (self.attempts.len() as u32) < self.max_attempts {
            self.attempts.push_back(now);
            true
        } else {
            false
        }
    }

    fn reset(&mut self, _now: Instant) {
        self.attempts.clear();
    }

    fn remaining(&self, now: Instant) -> u32 {
        let used = self.in_window(now).count() as u32;
        self.max_attempts.saturating_sub(used)
    }

    fn retry_after(&self, now: Instant) -> Option<Duration> {
        if self.remaining(now) > 0 {
            return None;
        }

        // The oldest admitted attempt leaving the window frees one slot.
        self.in_window(now)
            .next()
            .and_then(|oldest| oldest.checked_add(self.window))
            .map(|free_at| free_at.saturating_duration_since(now))
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.in_window(now).next().is_none()
    }
}

/// Continuously refilling token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket. `refill_rate` is in tokens per second.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    fn available(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity)
    }

    fn refill(&mut self, now: Instant) {
        if now > self.last_refill {
            self.tokens = self.available(now);
            self.last_refill = now;
        }
    }
}

impl LimitStrategy for TokenBucket {
    fn take(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    fn remaining(&self, now: Instant) -> u32 {
        self.available(now).floor() as u32
    }

    fn retry_after(&self, now: Instant) -> Option<Duration> {
        let available = self.available(now);
        if available >= 1.0 || self.refill_rate <= 0.0 {
            return None;
        }

        // Unrepresentable waits are reported as unknown.
        Duration::try_from_secs_f64((1.0 - available) / self.refill_rate).ok()
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.available(now) >= self.capacity
    }
}

/// A bucket in one of the two modes, fixed when the bucket is created.
#[derive(Debug, Clone)]
pub enum Bucket {
    Window(FixedWindow),
    Tokens(TokenBucket),
}

impl LimitStrategy for Bucket {
    fn take(&mut self, now: Instant) -> bool {
        match self {
            Bucket::Window(b) => b.take(now),
            Bucket::Tokens(b) => b.take(now),
        }
    }

    fn reset(&mut self, now: Instant) {
        match self {
            Bucket::Window(b) => b.reset(now),
            Bucket::Tokens(b) => b.reset(now),
        }
    }

    fn remaining(&self, now: Instant) -> u32 {
        match self {
            Bucket::Window(b) => b.remaining(now),
            Bucket::Tokens(b) => b.remaining(now),
        }
    }

    fn retry_after(&self, now: Instant) -> Option<Duration> {
        match self {
            Bucket::Window(b) => b.retry_after(now),
            Bucket::Tokens(b) => b.retry_after(now),
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        match self {
            Bucket::Window(b) => b.is_idle(now),
            Bucket::Tokens(b) => b.is_idle(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_window_admits_up_to_max() {
        let t0 = Instant::now();
        let mut bucket = FixedWindow::new(2, Duration::from_secs(60));

        assert!(bucket.take(t0));
        assert!(bucket.take(t0 + secs(1.0)));
        assert!(!bucket.take(t0 + secs(2.0)));
        assert_eq!(bucket.remaining(t0 + secs(2.0)), 0);
    }

    #[test]
    fn test_window_slides() {
        let t0 = Instant::now();
        let mut bucket = FixedWindow::new(2, Duration::from_secs(60));

        assert!(bucket.take(t0));
        assert!(bucket.take(t0 + secs(10.0)));
        assert!(!bucket.take(t0 + secs(30.0)));

        // First attempt has left the window, second has not.
        assert!(bucket.take(t0 + secs(61.0)));
        assert!(!bucket.take(t0 + secs(62.0)));
    }

    #[test]
    fn test_window_retry_after() {
        let t0 = Instant::now();
        let mut bucket = FixedWindow::new(1, Duration::from_secs(60));

        assert_eq!(bucket.retry_after(t0), None);
        assert!(bucket.take(t0));
        assert_eq!(bucket.retry_after(t0 + secs(20.0)), Some(secs(40.0)));
    }

    #[test]
    fn test_window_reset_and_idle() {
        let t0 = Instant::now();
        let mut bucket = FixedWindow::new(3, Duration::from_secs(60));

        assert!(bucket.is_idle(t0));
        bucket.take(t0);
        assert!(!bucket.is_idle(t0));
        assert!(bucket.is_idle(t0 + secs(61.0)));

        bucket.take(t0);
        bucket.reset(t0);
        assert_eq!(bucket.remaining(t0), 3);
    }

    #[test]
    fn test_token_bucket_capacity_then_refill() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5, 2.0, t0);

        for _ in 0..5 {
            assert!(bucket.take(t0));
        }
        assert!(!bucket.take(t0));

        // 1 / refill_rate seconds later exactly one more unit is available.
        let later = t0 + secs(0.5);
        assert!(bucket.take(later));
        assert!(!bucket.take(later));
    }

    #[test]
    fn test_token_bucket_retry_after() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1, 4.0, t0);

        assert!(bucket.take(t0));
        assert_eq!(bucket.retry_after(t0), Some(secs(0.25)));
        assert_eq!(bucket.retry_after(t0 + secs(0.25)), None);
    }

    #[test]
    fn test_token_bucket_retry_after_unrepresentable() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1, 1e-20, t0);

        assert!(bucket.take(t0));
        assert!(!bucket.take(t0));
        assert_eq!(bucket.retry_after(t0), None);
    }

    #[test]
    fn test_window_retry_after_with_huge_window() {
        let t0 = Instant::now();
        let mut bucket = FixedWindow::new(1, Duration::MAX);

        assert!(bucket.take(t0));
        assert!(!bucket.take(t0));
        assert_eq!(bucket.retry_after(t0), None);
    }

    #[test]
    fn test_token_bucket_idle_only_when_full() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2, 1.0, t0);

        assert!(bucket.is_idle(t0));
        bucket.take(t0);
        assert!(!bucket.is_idle(t0 + secs(0.5)));
        assert!(bucket.is_idle(t0 + secs(1.0)));
    }

    #[test]
    fn test_token_bucket_reset() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(3, 0.01, t0);
        bucket.take(t0);
        bucket.take(t0);
        bucket.reset(t0);
        assert_eq!(bucket.remaining(t0), 3);
    }

    #[test]
    fn test_bucket_dispatch() {
        let t0 = Instant::now();
        let mut window = Bucket::Window(FixedWindow::new(1, Duration::from_secs(1)));
        let mut tokens = Bucket::Tokens(TokenBucket::new(1, 1.0, t0));

        assert!(window.take(t0));
        assert!(!window.take(t0));
        assert!(tokens.take(t0));
        assert!(!tokens.take(t0));
    }

    proptest! {
        #[test]
        fn prop_token_bucket_never_exceeds_capacity(
            capacity in 1u32..50,
            rate in 0.1f64..20.0,
            gaps in proptest::collection::vec(0u64..2_000, 1..100),
        ) {
            let t0 = Instant::now();
            let mut bucket = TokenBucket::new(capacity, rate, t0);
            let mut now = t0;
            for gap in gaps {
                now += Duration::from_millis(gap);
                bucket.take(now);
                prop_assert!(bucket.remaining(now) <= capacity);
            }
        }

        #[test]
        fn prop_window_never_admits_more_than_max(
            max in 1u32..20,
            gaps in proptest::collection::vec(0u64..500, 1..200),
        ) {
            let window = Duration::from_secs(5);
            let t0 = Instant::now();
            let mut bucket = FixedWindow::new(max, window);
            let mut admitted: Vec<Instant> = Vec::new();
            let mut now = t0;
            for gap in gaps {
                now += Duration::from_millis(gap);
                if bucket.take(now) {
                    admitted.push(now);
                }
                let recent = admitted
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) <= window)
                    .count() as u32;
                prop_assert!(recent <= max);
            }
        }
    }
}
