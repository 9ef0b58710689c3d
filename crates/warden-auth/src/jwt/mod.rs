//! JWT issuing and validation backed by a revocation store.
//!
//! A token is trusted only if its signature verifies *and* it is present,
//! unrevoked and unexpired in the [`TokenStore`]. Every validation failure is
//! reported as [`AuthError::InvalidToken`]; the specific cause goes to the log.

pub mod claims;
pub mod keys;

pub use claims::{Claims, RESERVED_CLAIMS};
pub use keys::{SigningFamily, SigningKeys};

use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult, ConfigError};
use crate::tokens::{Token, TokenStore, TokenType};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Header, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_common_secret::redact_token;

/// Longest configurable token lifetime: ten years.
pub const MAX_LIFETIME_MINUTES: u64 = 10 * 365 * 24 * 60;

/// Convert a configured lifetime in minutes. Zero counts as unset.
pub fn lifetime(field: &'static str, minutes: u64) -> Result<Duration, ConfigError> {
    if minutes == 0 {
        return Err(ConfigError::MissingSetting(field));
    }
    if minutes > MAX_LIFETIME_MINUTES {
        return Err(ConfigError::InvalidLifetime { field, minutes });
    }
    Duration::try_minutes(minutes as i64).ok_or(ConfigError::InvalidLifetime { field, minutes })
}

/// Issues and validates signed bearer tokens.
pub struct JwtManager {
    keys: SigningKeys,
    issuer: Option<String>,
    audience: Option<String>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
    store: Arc<dyn TokenStore>,
}

impl JwtManager {
    /// Build a manager. Unsupported algorithms and unusable key material
    /// fail here, not on first use.
    pub fn new(config: &JwtConfig, store: Arc<dyn TokenStore>) -> Result<Self, ConfigError> {
        let keys = SigningKeys::from_config(config)?;
        let access_ttl = lifetime("auth.jwt.expirationMinutes", config.expiration_minutes)?;
        let refresh_ttl = lifetime(
            "auth.jwt.refreshExpirationMinutes",
            config.refresh_expiration_minutes.max(1),
        )?;

        let mut validation = Validation::new(keys.algorithm());
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &config.issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        info!(
            algorithm = ?keys.algorithm(),
            issuer = ?config.issuer,
            audience = ?config.audience,
            "JWT manager ready"
        );

        Ok(Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl,
            refresh_ttl,
            validation,
            store,
        })
    }

    /// Sign an access token for `user_id` and record it in the store.
    pub async fn generate_token(
        &self,
        user_id: &str,
        extra_claims: Map<String, Value>,
    ) -> AuthResult<String> {
        self.issue(user_id, TokenType::Access, self.access_ttl, extra_claims)
            .await
    }

    /// Sign a refresh token for `user_id` and record it in the store.
    pub async fn generate_refresh_token(&self, user_id: &str) -> AuthResult<String> {
        self.issue(user_id, TokenType::Refresh, self.refresh_ttl, Map::new())
            .await
    }

    /// Validate an access token and return its claims.
    pub async fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        self.verify(token, TokenType::Access).await
    }

    /// Exchange a valid refresh token for a new access token.
    ///
    /// Caller claims from the refresh token are not carried over.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let claims = self.verify(refresh_token, TokenType::Refresh).await?;
        self.generate_token(&claims.sub, Map::new()).await
    }

    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        self.store.revoke_token(token).await
    }

    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize> {
        self.store.revoke_all_user_tokens(user_id).await
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    async fn issue(
        &self,
        user_id: &str,
        token_type: TokenType,
        ttl: Duration,
        extra_claims: Map<String, Value>,
    ) -> AuthResult<String> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = Claims::issue(
            user_id,
            token_type,
            now,
            expires_at,
            self.issuer.as_deref(),
            self.audience.as_deref(),
            extra_claims,
        );

        let signed = encode(&Header::new(self.keys.algorithm), &claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))?;

        let record = Token {
            id: claims.jti.clone(),
            user_id: user_id.to_string(),
            value: signed.clone(),
            token_type,
            expires_at,
            created_at: now,
            revoked: false,
        };
        self.store.store_token(record).await?;

        debug!(user = %user_id, kind = ?token_type, jti = %claims.jti, "Token issued");
        Ok(signed)
    }

    async fn verify(&self, token: &str, expected: TokenType) -> AuthResult<Claims> {
        let redacted = redact_token(token);

        // Store membership first: cheap, and covers revocation.
        let record = match self.store.get_token(token).await {
            Ok(record) => record,
            Err(AuthError::Store(e)) => {
                error!(token = %redacted, error = %e, "Token store unavailable during validation");
                return Err(AuthError::InvalidToken);
            }
            Err(_) => {
                warn!(token = %redacted, reason = "unknown, revoked or expired", "Token rejected");
                return Err(AuthError::InvalidToken);
            }
        };

        let claims = match decode::<Claims>(token, &self.keys.decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                warn!(token = %redacted, reason = %e, "Token rejected");
                return Err(AuthError::InvalidToken);
            }
        };

        if claims.token_type != expected || record.token_type != expected {
            warn!(token = %redacted, reason = "wrong token type", expected = ?expected, "Token rejected");
            return Err(AuthError::InvalidToken);
        }

        if claims.sub != record.user_id {
            warn!(token = %redacted, reason = "subject mismatch", "Token rejected");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}
