//! OAuth wire and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use warden_common_secret::redact_token;

/// Token endpoint response (RFC 6749 §5.1).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &redact_token(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_deref().map(redact_token))
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Normalized identity from a provider's user-info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// `id` or `sub`, rendered as a string.
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// The full provider payload.
    pub raw: Value,
}

impl UserInfo {
    /// Normalize a raw payload. Fails when no identifier is present.
    pub fn from_raw(raw: Value) -> Option<Self> {
        let id = ["id", "sub"].iter().find_map(|k| match raw.get(*k)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| raw.get(*k).and_then(Value::as_str).map(str::to_string))
        };

        let email = text(&["email", "mail", "userPrincipalName"]);
        let name = text(&["name", "displayName", "login"]);
        let picture = text(&["picture", "avatar_url"]);

        Some(Self {
            id,
            email,
            name,
            picture,
            raw,
        })
    }
}

/// Result of a completed login: tokens bound to a resolved identity.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    /// `"<provider>:<subject>"`.
    pub user_id: String,
    pub provider: String,
    pub user_info: UserInfo,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}
