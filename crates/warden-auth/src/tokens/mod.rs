//! Issued access and refresh tokens with revocation and expiry.

pub mod file;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisTokenStore;

use crate::error::AuthResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;
use warden_common_secret::redact_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// A token record, keyed by its literal value.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub user_id: String,
    pub value: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

impl Token {
    /// A fresh record expiring `lifetime` from now. Lifetimes past the end
    /// of the calendar saturate.
    pub fn new(
        user_id: impl Into<String>,
        value: impl Into<String>,
        token_type: TokenType,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            value: value.into(),
            token_type,
            expires_at: now
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: now,
            revoked: false,
        }
    }

    /// Usable iff not revoked and not yet expired.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Utc::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("value", &redact_token(&self.value))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("revoked", &self.revoked)
            .finish()
    }
}

/// Token storage backend.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// `Conflict` if a token with the same value exists.
    async fn store_token(&self, token: Token) -> AuthResult<()>;

    /// `InvalidToken` when the token is missing, revoked or expired; the
    /// three cases are not distinguished.
    async fn get_token(&self, value: &str) -> AuthResult<Token>;

    /// Every record owned by `user_id`, oldest first.
    async fn get_tokens_by_user_id(&self, user_id: &str) -> AuthResult<Vec<Token>>;

    /// `NotFound` if the value was never stored (or was swept).
    async fn revoke_token(&self, value: &str) -> AuthResult<()>;

    /// Returns how many tokens were newly revoked.
    async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize>;

    /// Drop revoked and expired records. Returns how many were removed.
    async fn cleanup_expired_tokens(&self) -> AuthResult<usize>;
}

/// Periodically sweep a token store until the handle is aborted.
pub fn spawn_cleanup_task(store: Arc<dyn TokenStore>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
        interval.tick().await;

        loop {
            interval.tick().await;
            match store.cleanup_expired_tokens().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Swept expired tokens"),
                Err(e) => error!(error = %e, "Token sweep failed"),
            }
        }
    })
}
