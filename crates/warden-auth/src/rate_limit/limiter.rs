//! The composed rate limiter.

use super::bucket::{Bucket, LimitStrategy};
use super::settings::{BucketSpec, LimiterSettings};
use super::whitelist::IpWhitelist;
use super::{RateLimit, RateLimitExceeded, Scope};
use crate::config::{RateLimitAlgorithm, RateLimitConfig};
use crate::error::ConfigError;
use dashmap::DashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

const GLOBAL_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    scope: Scope,
    key: String,
}

impl BucketKey {
    fn new(scope: Scope, key: &str) -> Self {
        Self {
            scope,
            key: key.to_string(),
        }
    }
}

/// Per-scope bucket map plus the IP whitelist.
///
/// Buckets are created through the map's entry API, so concurrent first
/// access to a key always lands on a single bucket.
#[derive(Debug)]
pub struct RateLimiter {
    settings: LimiterSettings,
    buckets: DashMap<BucketKey, Bucket>,
    whitelist: IpWhitelist,
}

impl RateLimiter {
    pub fn new(settings: LimiterSettings, whitelist: IpWhitelist) -> Self {
        if settings.algorithm == RateLimitAlgorithm::LeakyBucket {
            warn!("rate limit algorithm leaky_bucket is handled as token_bucket");
        }
        info!(
            algorithm = ?settings.algorithm,
            ip_based = settings.ip_based,
            global = settings.global.is_some(),
            endpoints = settings.endpoints.len(),
            "Rate limiter created"
        );

        Self {
            settings,
            buckets: DashMap::new(),
            whitelist,
        }
    }

    /// Build from configuration and whitelist entries.
    pub fn from_config<S: AsRef<str>>(
        config: &RateLimitConfig,
        whitelist: &[S],
    ) -> Result<Self, ConfigError> {
        let settings = LimiterSettings::from_config(config)?;
        let whitelist = IpWhitelist::from_entries(whitelist)?;
        Ok(Self::new(settings, whitelist))
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn add_to_whitelist(&self, entry: &str) -> Result<(), ConfigError> {
        self.whitelist.add(entry)
    }

    pub fn remove_from_whitelist(&self, entry: &str) -> Result<bool, ConfigError> {
        self.whitelist.remove(entry)
    }

    pub fn whitelist(&self) -> &IpWhitelist {
        &self.whitelist
    }

    /// Number of live buckets across all scopes.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Units left in a bucket, or `None` if it does not exist yet.
    pub fn remaining_at(&self, scope: Scope, key: &str, now: Instant) -> Option<u32> {
        self.buckets
            .get(&BucketKey::new(scope, key))
            .map(|bucket| bucket.value().remaining(now))
    }

    fn take(
        &self,
        scope: Scope,
        key: &str,
        spec: &BucketSpec,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        let mut entry = self
            .buckets
            .entry(BucketKey::new(scope, key))
            .or_insert_with(|| spec.build(now));
        let bucket = entry.value_mut();

        if bucket.take(now) {
            return Ok(());
        }

        let retry_after = bucket.retry_after(now);
        drop(entry);

        warn!(%scope, key, retry_after = ?retry_after, "Rate limit exceeded");
        Err(RateLimitExceeded::new(scope, retry_after))
    }

    fn take_shared(&self, endpoint: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        if let Some(spec) = &self.settings.global {
            self.take(Scope::Global, GLOBAL_KEY, spec, now)?;
        }
        if let Some(spec) = self.settings.endpoints.get(endpoint) {
            self.take(Scope::Endpoint, endpoint, spec, now)?;
        }
        Ok(())
    }

    fn reset(&self, scope: Scope, key: &str, now: Instant) {
        if let Some(mut bucket) = self.buckets.get_mut(&BucketKey::new(scope, key)) {
            bucket.value_mut().reset(now);
        }
    }
}

impl RateLimit for RateLimiter {
    fn check_limit_at(
        &self,
        ip: &str,
        endpoint: &str,
        client_id: Option<&str>,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        if self.whitelist.contains_str(ip) {
            debug!(ip, "Whitelisted address bypasses rate limits");
            return Ok(());
        }

        self.take_shared(endpoint, now)?;

        if self.settings.ip_based {
            self.take(Scope::Ip, ip, &self.settings.ip, now)?;
        }

        if let Some(client) = client_id.filter(|c| !c.is_empty()) {
            self.take(Scope::Client, client, &self.settings.client, now)?;
        }

        Ok(())
    }

    fn check_shared_limits_at(
        &self,
        ip: &str,
        endpoint: &str,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        if self.whitelist.contains_str(ip) {
            return Ok(());
        }
        self.take_shared(endpoint, now)
    }

    fn record_success_at(&self, ip: &str, client_id: Option<&str>, now: Instant) {
        self.reset(Scope::Ip, ip, now);
        if let Some(client) = client_id.filter(|c| !c.is_empty()) {
            self.reset(Scope::Client, client, now);
        }
    }

    fn cleanup_old_entries_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_idle(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
