//! JWT claim set.

use crate::tokens::TokenType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Claims the manager owns. Extra claims may not override them.
pub const RESERVED_CLAIMS: &[&str] = &["sub", "iat", "exp", "nbf", "jti", "iss", "aud", "typ"];

/// Claim set of every token the manager issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expiration, seconds since the epoch.
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(rename = "typ", default = "default_token_type")]
    pub token_type: TokenType,
    /// Caller-supplied claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_token_type() -> TokenType {
    TokenType::Access
}

impl Claims {
    pub(crate) fn issue(
        user_id: &str,
        token_type: TokenType,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        issuer: Option<&str>,
        audience: Option<&str>,
        extra: Map<String, Value>,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: issuer.map(str::to_string),
            aud: audience.map(str::to_string),
            token_type,
            extra: without_reserved(extra),
        }
    }

    /// Look up a caller-supplied claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

fn without_reserved(mut extra: Map<String, Value>) -> Map<String, Value> {
    for name in RESERVED_CLAIMS {
        if extra.remove(*name).is_some() {
            warn!(claim = *name, "Ignoring attempt to override a reserved claim");
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_reserved_claims_dropped() {
        let now = Utc::now();
        let extra = json!({"sub": "root", "exp": 0, "role": "admin"})
            .as_object()
            .cloned()
            .unwrap();
        let claims = Claims::issue(
            "alice",
            TokenType::Access,
            now,
            now + Duration::minutes(5),
            None,
            None,
            extra,
        );

        assert_eq!(claims.sub, "alice");
        assert!(claims.exp > now.timestamp());
        assert_eq!(claims.get("role"), Some(&json!("admin")));
        assert_eq!(claims.extra.len(), 1);
    }

    #[test]
    fn test_flattened_wire_shape() {
        let now = Utc::now();
        let mut extra = Map::new();
        extra.insert("tenant".into(), json!("acme"));
        let claims = Claims::issue(
            "bob",
            TokenType::Refresh,
            now,
            now + Duration::days(1),
            Some("warden"),
            None,
            extra,
        );

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["typ"], "refresh");
        assert_eq!(value["tenant"], "acme");
        assert_eq!(value["iss"], "warden");
        assert!(value.get("aud").is_none());

        let back: Claims = serde_json::from_value(value).unwrap();
        assert_eq!(back, claims);
    }
}
