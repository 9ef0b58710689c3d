//! Resolved bucket shapes for every rate-limit scope.

use super::bucket::{Bucket, FixedWindow, TokenBucket};
use crate::config::{RateLimitAlgorithm, RateLimitConfig};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Slowest accepted `refillRate`: one token per ~11.6 days.
pub const MIN_REFILL_RATE: f64 = 1e-6;

/// How a bucket is created on first use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketSpec {
    Window { max_attempts: u32, window: Duration },
    Tokens { capacity: u32, refill_rate: f64 },
}

impl BucketSpec {
    /// A bucket of this shape, full at `now`.
    pub fn build(&self, now: Instant) -> Bucket {
        match *self {
            BucketSpec::Window {
                max_attempts,
                window,
            } => Bucket::Window(FixedWindow::new(max_attempts, window)),
            BucketSpec::Tokens {
                capacity,
                refill_rate,
            } => Bucket::Tokens(TokenBucket::new(capacity, refill_rate, now)),
        }
    }

    /// Shape for a shared budget of `max` requests per `window`.
    fn shared(algorithm: RateLimitAlgorithm, max: u32, window: Duration) -> Self {
        match algorithm {
            RateLimitAlgorithm::Counter => BucketSpec::Window {
                max_attempts: max,
                window,
            },
            RateLimitAlgorithm::TokenBucket | RateLimitAlgorithm::LeakyBucket => {
                BucketSpec::Tokens {
                    capacity: max,
                    refill_rate: max as f64 / window.as_secs_f64(),
                }
            }
        }
    }
}

/// Limiter settings derived once from configuration.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub algorithm: RateLimitAlgorithm,
    pub ip_based: bool,
    pub ip: BucketSpec,
    pub client: BucketSpec,
    pub global: Option<BucketSpec>,
    pub endpoints: HashMap<String, BucketSpec>,
    pub cleanup_interval: Duration,
}

impl LimiterSettings {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        if config.window == 0 {
            return Err(ConfigError::InvalidRateLimit("window must be positive".into()));
        }
        if config.max_attempts == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "maxAttempts must be positive".into(),
            ));
        }

        let window = Duration::from_secs(config.window);
        let algorithm = config.algorithm;

        let (ip, client) = match algorithm {
            RateLimitAlgorithm::Counter => {
                let client_max = config
                    .client_max_attempts
                    .unwrap_or(config.max_attempts.saturating_mul(2));
                (
                    BucketSpec::Window {
                        max_attempts: config.max_attempts,
                        window,
                    },
                    BucketSpec::Window {
                        max_attempts: client_max,
                        window,
                    },
                )
            }
            RateLimitAlgorithm::TokenBucket | RateLimitAlgorithm::LeakyBucket => {
                if config.bucket_size == 0 {
                    return Err(ConfigError::InvalidRateLimit(
                        "bucketSize must be positive".into(),
                    ));
                }
                if !config.refill_rate.is_finite() || config.refill_rate < MIN_REFILL_RATE {
                    return Err(ConfigError::InvalidRateLimit(format!(
                        "refillRate must be a number of at least {MIN_REFILL_RATE}, got {}",
                        config.refill_rate
                    )));
                }
                let client_capacity = config
                    .client_max_attempts
                    .unwrap_or(config.bucket_size.saturating_mul(2));
                (
                    BucketSpec::Tokens {
                        capacity: config.bucket_size,
                        refill_rate: config.refill_rate,
                    },
                    BucketSpec::Tokens {
                        capacity: client_capacity,
                        refill_rate: config.refill_rate,
                    },
                )
            }
        };

        let global = (config.global_rate_limit > 0)
            .then(|| BucketSpec::shared(algorithm, config.global_rate_limit, window));

        let mut endpoints = HashMap::with_capacity(config.endpoint_limits.len());
        for (path, limit) in &config.endpoint_limits {
            if limit.max_requests == 0 || limit.window == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "endpoint limit for {path} needs positive maxRequests and window"
                )));
            }
            endpoints.insert(
                path.clone(),
                BucketSpec::shared(
                    algorithm,
                    limit.max_requests,
                    Duration::from_secs(limit.window),
                ),
            );
        }

        Ok(Self {
            algorithm,
            ip_based: config.ip_based_enabled,
            ip,
            client,
            global,
            endpoints,
            cleanup_interval: Duration::from_secs(config.cleanup_interval.max(1)),
        })
    }
}
