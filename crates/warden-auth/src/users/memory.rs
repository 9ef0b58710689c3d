//! In-memory credential store.

use super::password::{hash_password, is_phc_hash, verify_dummy, verify_password};
use super::{NewUser, User, UserStore, UserUpdate, DEFAULT_ROLE};
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use warden_common_log::spans::Timer;
use warden_common_secret::redact_token;

#[derive(Debug, Default)]
struct Users {
    by_name: HashMap<String, User>,
    /// api key -> username
    by_api_key: HashMap<String, String>,
}

impl Users {
    fn insert(&mut self, user: User) {
        if let Some(key) = user.api_key.as_ref().filter(|k| !k.is_empty()) {
            self.by_api_key.insert(key.clone(), user.username.clone());
        }
        self.by_name.insert(user.username.clone(), user);
    }

    fn api_key_taken_by_other(&self, key: &str, username: &str) -> bool {
        self.by_api_key
            .get(key)
            .map(|owner| owner != username)
            .unwrap_or(false)
    }
}

/// Credential store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    inner: RwLock<Users>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing records, as loaded from disk.
    pub fn from_users(users: impl IntoIterator<Item = User>) -> AuthResult<Self> {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for user in users {
                if inner.by_name.contains_key(&user.username) {
                    return Err(AuthError::Conflict(format!(
                        "duplicate username {}",
                        user.username
                    )));
                }
                if let Some(key) = user.api_key.as_deref().filter(|k| !k.is_empty()) {
                    if inner.by_api_key.contains_key(key) {
                        return Err(AuthError::Conflict(format!(
                            "duplicate API key for {}",
                            user.username
                        )));
                    }
                }
                inner.insert(user);
            }
        }
        Ok(store)
    }

    fn touch(&self, username: &str) -> Option<User> {
        let mut inner = self.inner.write();
        let user = inner.by_name.get_mut(username)?;
        user.last_used_at = Some(Utc::now());
        Some(user.clone())
    }

    fn verify(user: Option<&User>, password: &str) -> bool {
        match user.and_then(|u| u.password_hash.as_deref()) {
            Some(hash) if is_phc_hash(hash) => verify_password(password, hash),
            _ => verify_dummy(password),
        }
    }
}

impl UserStore for MemoryUserStore {
    fn get_user_by_api_key(&self, api_key: &str) -> AuthResult<User> {
        if api_key.is_empty() {
            return Err(AuthError::NotFound);
        }

        let username = self
            .inner
            .read()
            .by_api_key
            .get(api_key)
            .cloned()
            .ok_or(AuthError::NotFound)?;

        debug!(key = %redact_token(api_key), user = %username, "API key matched");
        self.touch(&username).ok_or(AuthError::NotFound)
    }

    fn get_user_by_credentials(&self, username: &str, password: &str) -> AuthResult<User> {
        // Copy the record out so the slow verification runs without the lock.
        let user = self.inner.read().by_name.get(username).cloned();

        let timer = Timer::start("password_verify");
        let verified = Self::verify(user.as_ref(), password);
        timer.finish();

        if !verified {
            return Err(match user {
                None => AuthError::NotFound,
                Some(_) => AuthError::InvalidCredentials,
            });
        }

        self.touch(username).ok_or(AuthError::NotFound)
    }

    fn get_user(&self, username: &str) -> AuthResult<User> {
        self.inner
            .read()
            .by_name
            .get(username)
            .cloned()
            .ok_or(AuthError::NotFound)
    }

    fn add_user(&self, new_user: NewUser) -> AuthResult<User> {
        let password_hash = new_user
            .password
            .as_ref()
            .map(|p| hash_password(p.expose()))
            .transpose()?;
        let api_key = new_user.api_key.filter(|k| !k.is_empty());

        let user = User {
            username: new_user.username,
            api_key,
            password_hash,
            role: new_user.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            created_at: Utc::now(),
            last_used_at: None,
        };

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&user.username) {
            return Err(AuthError::Conflict(format!(
                "user {} already exists",
                user.username
            )));
        }
        if let Some(key) = &user.api_key {
            if inner.by_api_key.contains_key(key) {
                return Err(AuthError::Conflict("API key already in use".into()));
            }
        }

        inner.insert(user.clone());
        info!(user = %user.username, role = %user.role, "User added");
        Ok(user)
    }

    fn update_user(&self, username: &str, update: UserUpdate) -> AuthResult<User> {
        let password_hash = update
            .password
            .as_ref()
            .map(|p| hash_password(p.expose()))
            .transpose()?;
        let new_key = update.api_key.map(|k| k.filter(|k| !k.is_empty()));

        let mut inner = self.inner.write();
        if !inner.by_name.contains_key(username) {
            return Err(AuthError::NotFound);
        }
        if let Some(Some(key)) = &new_key {
            if inner.api_key_taken_by_other(key, username) {
                return Err(AuthError::Conflict("API key already in use".into()));
            }
        }

        let Users {
            by_name,
            by_api_key,
        } = &mut *inner;
        let user = by_name.get_mut(username).ok_or(AuthError::NotFound)?;

        if let Some(new_key) = new_key {
            if let Some(old) = user.api_key.take() {
                by_api_key.remove(&old);
            }
            if let Some(key) = &new_key {
                by_api_key.insert(key.clone(), username.to_string());
            }
            user.api_key = new_key;
        }
        if let Some(hash) = password_hash {
            user.password_hash = Some(hash);
        }
        if let Some(role) = update.role {
            user.role = role;
        }

        info!(user = %username, "User updated");
        Ok(user.clone())
    }

    fn delete_user(&self, username: &str) -> AuthResult<()> {
        let mut inner = self.inner.write();
        let user = inner.by_name.remove(username).ok_or(AuthError::NotFound)?;
        if let Some(key) = user.api_key {
            inner.by_api_key.remove(&key);
        }
        info!(user = %username, "User deleted");
        Ok(())
    }

    fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.inner.read().by_name.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_alice() -> MemoryUserStore {
        let store = MemoryUserStore::new();
        store
            .add_user(
                NewUser::new("alice")
                    .with_password("correct horse")
                    .with_api_key("ak_alice")
                    .with_role("admin"),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_lookup_by_api_key() {
        let store = store_with_alice();

        let user = store.get_user_by_api_key("ak_alice").unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, "admin");
        assert!(user.last_used_at.is_some());

        assert!(matches!(
            store.get_user_by_api_key("ak_nobody"),
            Err(AuthError::NotFound)
        ));
        assert!(matches!(store.get_user_by_api_key(""), Err(AuthError::NotFound)));
    }

    #[test]
    fn test_lookup_by_credentials() {
        let store = store_with_alice();

        assert!(store.get_user_by_credentials("alice", "correct horse").is_ok());
        assert!(matches!(
            store.get_user_by_credentials("alice", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            store.get_user_by_credentials("mallory", "correct horse"),
            Err(AuthError::NotFound)
        ));
    }

    #[test]
    fn test_password_is_hashed() {
        let store = store_with_alice();
        let user = store.get_user("alice").unwrap();
        let hash = user.password_hash.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("correct horse"));
    }

    #[test]
    fn test_user_without_password_cannot_log_in() {
        let store = MemoryUserStore::new();
        store.add_user(NewUser::new("svc").with_api_key("ak_svc")).unwrap();
        assert!(matches!(
            store.get_user_by_credentials("svc", ""),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_duplicates_conflict() {
        let store = store_with_alice();
        assert!(matches!(
            store.add_user(NewUser::new("alice")),
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            store.add_user(NewUser::new("bob").with_api_key("ak_alice")),
            Err(AuthError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_rebalances_api_key_index() {
        let store = store_with_alice();
        store.add_user(NewUser::new("bob").with_api_key("ak_bob")).unwrap();

        let update = UserUpdate {
            api_key: Some(Some("ak_alice_2".into())),
            ..Default::default()
        };
        store.update_user("alice", update).unwrap();

        assert!(store.get_user_by_api_key("ak_alice").is_err());
        assert_eq!(store.get_user_by_api_key("ak_alice_2").unwrap().username, "alice");

        let steal = UserUpdate {
            api_key: Some(Some("ak_bob".into())),
            ..Default::default()
        };
        assert!(matches!(
            store.update_user("alice", steal),
            Err(AuthError::Conflict(_))
        ));

        let clear = UserUpdate {
            api_key: Some(None),
            role: Some("auditor".into()),
            ..Default::default()
        };
        let alice = store.update_user("alice", clear).unwrap();
        assert!(alice.api_key.is_none());
        assert_eq!(alice.role, "auditor");
        assert!(store.get_user_by_api_key("ak_alice_2").is_err());
    }

    #[test]
    fn test_update_keeps_own_key() {
        let store = store_with_alice();
        let same = UserUpdate {
            api_key: Some(Some("ak_alice".into())),
            ..Default::default()
        };
        assert!(store.update_user("alice", same).is_ok());
        assert!(store.get_user_by_api_key("ak_alice").is_ok());
    }

    #[test]
    fn test_delete_and_list() {
        let store = store_with_alice();
        store.add_user(NewUser::new("bob")).unwrap();

        let names: Vec<_> = store.list_users().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        store.delete_user("alice").unwrap();
        assert!(store.get_user_by_api_key("ak_alice").is_err());
        assert!(matches!(store.delete_user("alice"), Err(AuthError::NotFound)));
        assert_eq!(store.list_users().len(), 1);
    }

    #[test]
    fn test_returned_users_are_copies() {
        let store = store_with_alice();
        let mut copy = store.get_user("alice").unwrap();
        copy.role = "root".into();
        assert_eq!(store.get_user("alice").unwrap().role, "admin");
    }

    #[test]
    fn test_from_users_rejects_duplicate_keys() {
        let user = |name: &str| User {
            username: name.into(),
            api_key: Some("shared".into()),
            password_hash: None,
            role: DEFAULT_ROLE.into(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        assert!(MemoryUserStore::from_users(vec![user("a"), user("b")]).is_err());
    }
}
