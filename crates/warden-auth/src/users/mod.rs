//! Credential store: API keys and username/password pairs.

pub mod file;
pub mod memory;
pub mod password;

pub use file::FileUserStore;
pub use memory::MemoryUserStore;

use crate::error::AuthResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_common_secret::{redact_token, SecretString};

/// Role given to users created without one.
pub const DEFAULT_ROLE: &str = "user";

/// A stored user. Stores hand out copies, never references.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Argon2id PHC string. Legacy files may carry a plaintext `password`.
    #[serde(default, alias = "password", skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("api_key", &self.api_key.as_deref().map(redact_token))
            .field("password_hash", &self.password_hash.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

/// Input to [`UserStore::add_user`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: Option<SecretString>,
    pub api_key: Option<String>,
    pub role: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Partial update for [`UserStore::update_user`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    /// `Some(None)` removes the API key.
    pub api_key: Option<Option<String>>,
    pub password: Option<SecretString>,
    pub role: Option<String>,
}

/// Contract shared by the memory and file backed credential stores.
///
/// Password verification is deliberately slow; async callers should run
/// [`get_user_by_credentials`](UserStore::get_user_by_credentials) on a
/// blocking thread.
pub trait UserStore: Send + Sync {
    /// `NotFound` when no user holds this key.
    fn get_user_by_api_key(&self, api_key: &str) -> AuthResult<User>;

    /// `NotFound` for an unknown username, `InvalidCredentials` for a wrong
    /// password. Both take the same time.
    fn get_user_by_credentials(&self, username: &str, password: &str) -> AuthResult<User>;

    fn get_user(&self, username: &str) -> AuthResult<User>;

    /// `Conflict` when the username or API key is taken.
    fn add_user(&self, user: NewUser) -> AuthResult<User>;

    fn update_user(&self, username: &str, update: UserUpdate) -> AuthResult<User>;

    fn delete_user(&self, username: &str) -> AuthResult<()>;

    /// All users, sorted by username.
    fn list_users(&self) -> Vec<User>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let user = User {
            username: "alice".into(),
            api_key: Some("ak_live_0123456789".into()),
            password_hash: Some("$argon2id$v=19$...".into()),
            role: "admin".into(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        let debug = format!("{user:?}");
        assert!(debug.contains("ak_live_..."));
        assert!(!debug.contains("0123456789"));
        assert!(!debug.contains("argon2id"));
    }

    #[test]
    fn test_legacy_record_shape() {
        let user: User =
            serde_json::from_str(r#"{"username": "bob", "password": "plain"}"#).unwrap();
        assert_eq!(user.password_hash.as_deref(), Some("plain"));
        assert_eq!(user.role, DEFAULT_ROLE);
        assert!(user.api_key.is_none());
    }
}
