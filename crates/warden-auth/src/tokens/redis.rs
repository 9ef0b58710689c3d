//! Redis-backed token store.
//!
//! Records live under `warden:token:<value>` as JSON with an expiry equal to
//! the token's remaining lifetime. `warden:user_tokens:<user>` is a set of the
//! user's token values.

use super::{Token, TokenStore};
use crate::error::{AuthError, AuthResult, StoreError};
use ::redis::AsyncCommands;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use warden_common_secret::redact_token;

const TOKEN_PREFIX: &str = "warden:token:";
const USER_PREFIX: &str = "warden:user_tokens:";

fn token_key(value: &str) -> String {
    format!("{TOKEN_PREFIX}{value}")
}

fn user_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

fn store_err(e: ::redis::RedisError) -> AuthError {
    AuthError::Store(StoreError::Redis(e))
}

/// Token store shared between processes through Redis.
pub struct RedisTokenStore {
    client: ::redis::Client,
}

impl RedisTokenStore {
    pub fn new(url: &str) -> AuthResult<Self> {
        let client = ::redis::Client::open(url).map_err(store_err)?;
        info!(url = %url, "Redis token store configured");
        Ok(Self { client })
    }

    async fn connection(&self) -> AuthResult<::redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(store_err)
    }

    async fn load(
        conn: &mut ::redis::aio::Connection,
        value: &str,
    ) -> AuthResult<Option<Token>> {
        let raw: Option<String> = conn.get(token_key(value)).await.map_err(store_err)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| AuthError::Store(e.into())))
            .transpose()
    }

    /// Overwrite an existing record, keeping its expiry.
    async fn save_existing(conn: &mut ::redis::aio::Connection, token: &Token) -> AuthResult<()> {
        let json = serde_json::to_string(token).map_err(|e| AuthError::Store(e.into()))?;
        ::redis::cmd("SET")
            .arg(token_key(&token.value))
            .arg(json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async::<_, Option<String>>(conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn store_token(&self, token: Token) -> AuthResult<()> {
        let ttl = (token.expires_at - Utc::now()).num_seconds().max(1);
        let json = serde_json::to_string(&token).map_err(|e| AuthError::Store(e.into()))?;
        let mut conn = self.connection().await?;

        let created: Option<String> = ::redis::cmd("SET")
            .arg(token_key(&token.value))
            .arg(json)
            .arg("EX")
            .arg(ttl)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if created.is_none() {
            return Err(AuthError::Conflict("token already stored".into()));
        }

        conn.sadd::<_, _, ()>(user_key(&token.user_id), &token.value)
            .await
            .map_err(store_err)?;

        debug!(token = %redact_token(&token.value), user = %token.user_id, "Token stored");
        Ok(())
    }

    async fn get_token(&self, value: &str) -> AuthResult<Token> {
        let mut conn = self.connection().await?;
        match Self::load(&mut conn, value).await? {
            Some(token) if token.is_usable() => Ok(token),
            _ => Err(AuthError::InvalidToken),
        }
    }

    async fn get_tokens_by_user_id(&self, user_id: &str) -> AuthResult<Vec<Token>> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.smembers(user_key(user_id)).await.map_err(store_err)?;

        let mut tokens = Vec::with_capacity(values.len());
        for value in values {
            if let Some(token) = Self::load(&mut conn, &value).await? {
                tokens.push(token);
            }
        }
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn revoke_token(&self, value: &str) -> AuthResult<()> {
        let mut conn = self.connection().await?;
        let mut token = Self::load(&mut conn, value)
            .await?
            .ok_or(AuthError::NotFound)?;
        token.revoked = true;
        Self::save_existing(&mut conn, &token).await?;

        info!(token = %redact_token(value), user = %token.user_id, "Token revoked");
        Ok(())
    }

    async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.smembers(user_key(user_id)).await.map_err(store_err)?;

        let mut revoked = 0;
        for value in values {
            if let Some(mut token) = Self::load(&mut conn, &value).await? {
                if !token.revoked {
                    token.revoked = true;
                    Self::save_existing(&mut conn, &token).await?;
                    revoked += 1;
                }
            }
        }

        info!(user = %user_id, revoked, "User tokens revoked");
        Ok(revoked)
    }

    async fn cleanup_expired_tokens(&self) -> AuthResult<usize> {
        let mut conn = self.connection().await?;

        let mut user_sets = Vec::new();
        {
            let mut iter: ::redis::AsyncIter<String> = conn
                .scan_match(format!("{USER_PREFIX}*"))
                .await
                .map_err(store_err)?;
            while let Some(key) = iter.next_item().await {
                user_sets.push(key);
            }
        }

        let mut removed = 0;
        for set in user_sets {
            let values: Vec<String> = conn.smembers(&set).await.map_err(store_err)?;
            for value in values {
                // Expired records are already gone; revoked ones are deleted here.
                let keep = match Self::load(&mut conn, &value).await? {
                    Some(token) if token.revoked => {
                        conn.del::<_, ()>(token_key(&value)).await.map_err(store_err)?;
                        removed += 1;
                        false
                    }
                    Some(_) => true,
                    None => {
                        removed += 1;
                        false
                    }
                };
                if !keep {
                    conn.srem::<_, _, ()>(&set, &value).await.map_err(store_err)?;
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenType;
    use chrono::Duration;

    #[test]
    fn test_key_layout() {
        assert_eq!(token_key("abc"), "warden:token:abc");
        assert_eq!(user_key("github:42"), "warden:user_tokens:github:42");
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(RedisTokenStore::new("not-a-redis-url").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn test_round_trip_against_server() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let store = RedisTokenStore::new(&url).unwrap();
        let value = format!("test-{}", uuid::Uuid::new_v4());

        store
            .store_token(Token::new("redis-user", &value, TokenType::Access, Duration::minutes(5)))
            .await
            .unwrap();
        assert!(store.get_token(&value).await.is_ok());

        store.revoke_token(&value).await.unwrap();
        assert!(matches!(
            store.get_token(&value).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(store.cleanup_expired_tokens().await.unwrap() >= 1);
    }
}
