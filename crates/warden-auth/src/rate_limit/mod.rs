//! Adaptive rate limiting.
//!
//! A [`RateLimiter`] composes per-key buckets into global, endpoint, IP and
//! client budgets. The middleware only sees the [`RateLimit`] trait so that a
//! disabled limiter is just [`Unlimited`].

pub mod bucket;
pub mod limiter;
pub mod settings;
pub mod whitelist;

pub use bucket::{Bucket, FixedWindow, LimitStrategy, TokenBucket};
pub use limiter::RateLimiter;
pub use settings::{BucketSpec, LimiterSettings};
pub use whitelist::IpWhitelist;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Budget a bucket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Ip,
    Client,
    Endpoint,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Global => "global",
            Scope::Ip => "ip",
            Scope::Client => "client",
            Scope::Endpoint => "endpoint",
        };
        f.write_str(name)
    }
}

/// A request was refused by one of the budgets.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded ({scope} scope)")]
pub struct RateLimitExceeded {
    pub scope: Scope,
    /// Time until the denying bucket admits again, when it can tell.
    pub retry_after: Option<Duration>,
}

impl RateLimitExceeded {
    pub fn new(scope: Scope, retry_after: Option<Duration>) -> Self {
        Self { scope, retry_after }
    }
}

/// Admission budget consulted by the middleware.
///
/// The `_at` variants take the clock explicitly; the plain ones use
/// `Instant::now()`.
pub trait RateLimit: Send + Sync {
    /// Full decision chain: whitelist, global, endpoint, IP, client.
    fn check_limit_at(
        &self,
        ip: &str,
        endpoint: &str,
        client_id: Option<&str>,
        now: Instant,
    ) -> Result<(), RateLimitExceeded>;

    /// Global and endpoint budgets only. Applied when authentication is off.
    fn check_shared_limits_at(
        &self,
        ip: &str,
        endpoint: &str,
        now: Instant,
    ) -> Result<(), RateLimitExceeded>;

    /// Clear the caller's IP and client pressure after a successful login.
    fn record_success_at(&self, ip: &str, client_id: Option<&str>, now: Instant);

    /// Drop idle buckets. Returns how many were removed.
    fn cleanup_old_entries_at(&self, now: Instant) -> usize;

    fn check_limit(
        &self,
        ip: &str,
        endpoint: &str,
        client_id: Option<&str>,
    ) -> Result<(), RateLimitExceeded> {
        self.check_limit_at(ip, endpoint, client_id, Instant::now())
    }

    fn check_shared_limits(&self, ip: &str, endpoint: &str) -> Result<(), RateLimitExceeded> {
        self.check_shared_limits_at(ip, endpoint, Instant::now())
    }

    fn record_success(&self, ip: &str, client_id: Option<&str>) {
        self.record_success_at(ip, client_id, Instant::now())
    }

    fn cleanup_old_entries(&self) -> usize {
        self.cleanup_old_entries_at(Instant::now())
    }
}

/// Limiter used when rate limiting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl RateLimit for Unlimited {
    fn check_limit_at(
        &self,
        _ip: &str,
        _endpoint: &str,
        _client_id: Option<&str>,
        _now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        Ok(())
    }

    fn check_shared_limits_at(
        &self,
        _ip: &str,
        _endpoint: &str,
        _now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        Ok(())
    }

    fn record_success_at(&self, _ip: &str, _client_id: Option<&str>, _now: Instant) {}

    fn cleanup_old_entries_at(&self, _now: Instant) -> usize {
        0
    }
}

/// Periodically sweep idle buckets until the returned handle is aborted.
pub fn spawn_cleanup_task(limiter: Arc<dyn RateLimit>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = limiter.cleanup_old_entries();
            if removed > 0 {
                debug!(removed, "Swept idle rate limit buckets");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Global.to_string(), "global");
        assert_eq!(Scope::Endpoint.to_string(), "endpoint");
        assert_eq!(
            RateLimitExceeded::new(Scope::Client, None).to_string(),
            "rate limit exceeded (client scope)"
        );
    }

    #[test]
    fn test_unlimited_never_denies() {
        let limiter = Unlimited;
        for _ in 0..1000 {
            assert!(limiter.check_limit("10.0.0.1", "/", Some("c")).is_ok());
        }
        assert_eq!(limiter.cleanup_old_entries(), 0);
    }
}
