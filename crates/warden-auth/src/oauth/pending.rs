//! Provisional grants keyed by the OAuth `state` value.
//!
//! A state is registered when the authorization URL is built, receives the
//! token response after the code exchange, and is consumed once the identity
//! behind it is known. Nothing reaches the token store before that.

use super::types::TokenResponse;
use crate::error::{AuthError, AuthResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Lifetime of a provisional grant.
pub const GRANT_TTL: Duration = Duration::from_secs(10 * 60);

/// Most grants held at once. Past this the oldest is evicted.
pub const MAX_PENDING_GRANTS: usize = 10_000;

#[derive(Debug)]
struct PendingGrant {
    provider: String,
    created_at: Instant,
    response: Option<TokenResponse>,
}

#[derive(Debug)]
pub struct PendingGrants {
    grants: Mutex<HashMap<String, PendingGrant>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for PendingGrants {
    fn default() -> Self {
        Self::new(GRANT_TTL)
    }
}

impl PendingGrants {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, MAX_PENDING_GRANTS)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn expired(&self, grant: &PendingGrant, now: Instant) -> bool {
        now.saturating_duration_since(grant.created_at) >= self.ttl
    }

    /// Record a freshly issued state. Re-registering the same state for the
    /// same provider restarts its clock.
    pub fn register(&self, state: &str, provider: &str, now: Instant) -> AuthResult<()> {
        let mut grants = self.grants.lock();
        if let Some(existing) = grants.get(state) {
            if existing.provider != provider || existing.response.is_some() {
                return Err(AuthError::Conflict("OAuth state already in use".into()));
            }
        } else if grants.len() >= self.capacity {
            let ttl = self.ttl;
            grants.retain(|_, g| now.saturating_duration_since(g.created_at) < ttl);
            if grants.len() >= self.capacity {
                let oldest = grants
                    .iter()
                    .min_by_key(|(_, g)| g.created_at)
                    .map(|(state, _)| state.clone());
                if let Some(oldest) = oldest {
                    grants.remove(&oldest);
                    warn!(capacity = self.capacity, "Pending OAuth grants full, oldest evicted");
                }
            }
        }
        grants.insert(
            state.to_string(),
            PendingGrant {
                provider: provider.to_string(),
                created_at: now,
                response: None,
            },
        );
        Ok(())
    }

    /// Whether `state` is awaiting a code exchange for `provider`.
    pub fn check_awaiting(&self, state: &str, provider: &str, now: Instant) -> AuthResult<()> {
        let grants = self.grants.lock();
        match grants.get(state) {
            Some(g) if g.provider == provider && g.response.is_none() && !self.expired(g, now) => {
                Ok(())
            }
            _ => {
                warn!(provider, reason = "unknown, expired or used state", "OAuth exchange rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Park the exchanged tokens under `state`.
    pub fn attach(
        &self,
        state: &str,
        provider: &str,
        response: TokenResponse,
        now: Instant,
    ) -> AuthResult<()> {
        let mut grants = self.grants.lock();
        let ttl = self.ttl;
        match grants.get_mut(state) {
            Some(g)
                if g.provider == provider
                    && g.response.is_none()
                    && now.saturating_duration_since(g.created_at) < ttl =>
            {
                g.response = Some(response);
                Ok(())
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// Remove the grant and hand back its tokens.
    pub fn take(&self, state: &str, provider: &str, now: Instant) -> AuthResult<TokenResponse> {
        let grant = self
            .grants
            .lock()
            .remove(state)
            .ok_or(AuthError::InvalidCredentials)?;

        if grant.provider != provider || self.expired(&grant, now) {
            warn!(provider, reason = "provider mismatch or expired grant", "OAuth login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        grant.response.ok_or(AuthError::InvalidCredentials)
    }

    /// Drop grants older than the TTL. Returns how many were dropped.
    pub fn discard_expired(&self, now: Instant) -> usize {
        let mut grants = self.grants.lock();
        let before = grants.len();
        let ttl = self.ttl;
        grants.retain(|_, g| now.saturating_duration_since(g.created_at) < ttl);
        before - grants.len()
    }

    pub fn len(&self) -> usize {
        self.grants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
