//! In-memory token store.

use super::{Token, TokenStore};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use warden_common_secret::redact_token;

#[derive(Debug, Default)]
struct Tokens {
    by_value: HashMap<String, Token>,
    /// user id -> token values, in insertion order
    by_user: HashMap<String, Vec<String>>,
    /// token value -> insertion sequence
    order: HashMap<String, u64>,
    next_seq: u64,
}

impl Tokens {
    fn insert(&mut self, token: Token) {
        self.order.insert(token.value.clone(), self.next_seq);
        self.next_seq += 1;
        self.by_user
            .entry(token.user_id.clone())
            .or_default()
            .push(token.value.clone());
        self.by_value.insert(token.value.clone(), token);
    }

    /// Drop index entries whose record is gone. Survivors keep their order.
    fn prune_index(&mut self) {
        let by_value = &self.by_value;
        self.by_user.retain(|_, values| {
            values.retain(|v| by_value.contains_key(v));
            !values.is_empty()
        });
        self.order.retain(|v, _| by_value.contains_key(v));
    }
}

/// Token store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Tokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing records, as loaded from disk. Records
    /// keep the given order; a repeated value keeps its first record.
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut inner = Tokens::default();
        for token in tokens {
            if !inner.by_value.contains_key(&token.value) {
                inner.insert(token);
            }
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Every record, in insertion order.
    pub fn snapshot(&self) -> Vec<Token> {
        let inner = self.inner.read();
        let mut tokens: Vec<(u64, Token)> = inner
            .by_value
            .values()
            .map(|t| (inner.order.get(&t.value).copied().unwrap_or(u64::MAX), t.clone()))
            .collect();
        tokens.sort_by_key(|(seq, _)| *seq);
        tokens.into_iter().map(|(_, t)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn store_sync(&self, token: Token) -> AuthResult<()> {
        let mut inner = self.inner.write();
        if inner.by_value.contains_key(&token.value) {
            return Err(AuthError::Conflict("token already stored".into()));
        }

        debug!(token = %redact_token(&token.value), user = %token.user_id, kind = ?token.token_type, "Token stored");
        inner.insert(token);
        Ok(())
    }

    pub(crate) fn get_sync(&self, value: &str) -> AuthResult<Token> {
        let inner = self.inner.read();
        match inner.by_value.get(value) {
            Some(token) if token.is_usable_at(Utc::now()) => Ok(token.clone()),
            _ => Err(AuthError::InvalidToken),
        }
    }

    pub(crate) fn by_user_sync(&self, user_id: &str) -> Vec<Token> {
        let inner = self.inner.read();
        inner
            .by_user
            .get(user_id)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| inner.by_value.get(v).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn revoke_sync(&self, value: &str) -> AuthResult<()> {
        let mut inner = self.inner.write();
        let token = inner.by_value.get_mut(value).ok_or(AuthError::NotFound)?;
        token.revoked = true;
        info!(token = %redact_token(value), user = %token.user_id, "Token revoked");
        Ok(())
    }

    pub(crate) fn revoke_user_sync(&self, user_id: &str) -> usize {
        let mut inner = self.inner.write();
        let Tokens {
            by_value, by_user, ..
        } = &mut *inner;

        let mut revoked = 0;
        for value in by_user.get(user_id).into_iter().flatten() {
            if let Some(token) = by_value.get_mut(value) {
                if !token.revoked {
                    token.revoked = true;
                    revoked += 1;
                }
            }
        }

        info!(user = %user_id, revoked, "User tokens revoked");
        revoked
    }

    pub(crate) fn cleanup_sync(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let before = inner.by_value.len();
        inner.by_value.retain(|_, token| token.is_usable_at(now));
        let removed = before - inner.by_value.len();
        if removed > 0 {
            inner.prune_index();
        }
        removed
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_token(&self, token: Token) -> AuthResult<()> {
        self.store_sync(token)
    }

    async fn get_token(&self, value: &str) -> AuthResult<Token> {
        self.get_sync(value)
    }

    async fn get_tokens_by_user_id(&self, user_id: &str) -> AuthResult<Vec<Token>> {
        Ok(self.by_user_sync(user_id))
    }

    async fn revoke_token(&self, value: &str) -> AuthResult<()> {
        self.revoke_sync(value)
    }

    async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize> {
        Ok(self.revoke_user_sync(user_id))
    }

    async fn cleanup_expired_tokens(&self) -> AuthResult<usize> {
        Ok(self.cleanup_sync())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenType;
    use chrono::Duration;

    fn access(user: &str, value: &str) -> Token {
        Token::new(user, value, TokenType::Access, Duration::hours(1))
    }

    fn expired(user: &str, value: &str) -> Token {
        let mut token = access(user, value);
        token.expires_at = Utc::now() - Duration::seconds(1);
        token
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let store = MemoryTokenStore::new();
        store.store_token(access("alice", "t1")).await.unwrap();

        let token = store.get_token("t1").await.unwrap();
        assert_eq!(token.user_id, "alice");
        assert!(matches!(
            store.store_token(access("bob", "t1")).await,
            Err(AuthError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_revoked_expired_look_alike() {
        let store = MemoryTokenStore::new();
        store.store_token(access("alice", "revoked")).await.unwrap();
        store.store_token(expired("alice", "expired")).await.unwrap();
        store.revoke_token("revoked").await.unwrap();

        for value in ["missing", "revoked", "expired"] {
            assert!(matches!(
                store.get_token(value).await,
                Err(AuthError::InvalidToken)
            ));
        }
    }

    #[tokio::test]
    async fn test_revoke_unknown() {
        let store = MemoryTokenStore::new();
        assert!(matches!(
            store.revoke_token("nope").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoke_all_user_tokens() {
        let store = MemoryTokenStore::new();
        store.store_token(access("alice", "a1")).await.unwrap();
        store.store_token(access("alice", "a2")).await.unwrap();
        store.store_token(access("bob", "b1")).await.unwrap();
        store.revoke_token("a1").await.unwrap();

        assert_eq!(store.revoke_all_user_tokens("alice").await.unwrap(), 1);
        assert!(store.get_token("a2").await.is_err());
        assert!(store.get_token("b1").await.is_ok());
        assert_eq!(store.revoke_all_user_tokens("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_rebuilds_index() {
        let store = MemoryTokenStore::new();
        store.store_token(access("alice", "keep")).await.unwrap();
        store.store_token(expired("alice", "old")).await.unwrap();
        store.store_token(access("bob", "gone")).await.unwrap();
        store.revoke_token("gone").await.unwrap();

        assert_eq!(store.cleanup_expired_tokens().await.unwrap(), 2);
        assert_eq!(store.len(), 1);

        let alice: Vec<_> = store
            .get_tokens_by_user_id("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(alice, vec!["keep"]);
        assert!(store.get_tokens_by_user_id("bob").await.unwrap().is_empty());
        assert!(matches!(
            store.revoke_token("gone").await,
            Err(AuthError::NotFound)
        ));
    }

    fn values(tokens: Vec<Token>) -> Vec<String> {
        tokens.into_iter().map(|t| t.value).collect()
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let created_at = Utc::now();
        let mut records = Vec::new();
        for value in ["z", "m", "a", "q"] {
            let mut token = access("dana", value);
            token.created_at = created_at;
            records.push(token);
        }
        let mut stale = expired("dana", "stale");
        stale.created_at = created_at;
        records.insert(2, stale);

        let store = MemoryTokenStore::from_tokens(records);
        assert_eq!(store.cleanup_expired_tokens().await.unwrap(), 1);

        let listed = values(store.get_tokens_by_user_id("dana").await.unwrap());
        assert_eq!(listed, vec!["z", "m", "a", "q"]);
        assert_eq!(values(store.snapshot()), listed);

        // A persisted snapshot reloads in the same order.
        let reloaded = MemoryTokenStore::from_tokens(store.snapshot());
        assert_eq!(
            values(reloaded.get_tokens_by_user_id("dana").await.unwrap()),
            listed
        );
    }

    #[tokio::test]
    async fn test_tokens_by_user_in_order() {
        let store = MemoryTokenStore::new();
        for value in ["x1", "x2", "x3"] {
            store.store_token(access("carol", value)).await.unwrap();
        }
        let values: Vec<_> = store
            .get_tokens_by_user_id("carol")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(values, vec!["x1", "x2", "x3"]);
    }
}
