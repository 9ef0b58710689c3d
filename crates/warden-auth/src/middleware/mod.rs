//! Request admission.
//!
//! [`AuthMiddleware::authorize`] turns request metadata into an [`Admission`]:
//! rate limits are consumed first, then the credential for the configured
//! [`AuthType`] is checked. Denials carry no hint of which check failed.

pub mod extractor;
pub mod layer;
pub mod response;

pub use extractor::{Auth, MaybeAuth};
pub use layer::{AuthLayer, AuthService, RateLimitLayer, RateLimitService};
pub use response::Denial;

use crate::config::AuthType;
use crate::error::{AuthError, AuthResult, ConfigError};
use crate::jwt::{Claims, JwtManager};
use crate::oauth::OAuthManager;
use crate::rate_limit::{RateLimit, Unlimited};
use crate::users::{UserStore, DEFAULT_ROLE};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use warden_common_log::spans::record_ip;
use warden_common_secret::SecretString;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identity given to callers presenting the static `auth.apiKey`.
pub const STATIC_KEY_USER: &str = "api-key";
const STATIC_KEY_ROLE: &str = "admin";

/// How the caller proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    ApiKey,
    Basic,
    Jwt,
    OAuth,
}

/// Identity attached to an admitted request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub username: String,
    pub role: String,
    pub method: AuthMethod,
    /// Present for JWT callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Outcome of one admission decision.
#[derive(Debug)]
pub enum Admission {
    /// Authentication is off. No identity is attached.
    Disabled,
    Admitted(AuthUser),
    Denied(Denial),
}

/// What the middleware needs to know about a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub headers: &'a HeaderMap,
    /// Address of the TCP peer, when the server exposes it.
    pub peer: Option<IpAddr>,
    pub path: &'a str,
}

impl<'a> RequestMeta<'a> {
    pub fn new(headers: &'a HeaderMap, peer: Option<IpAddr>, path: &'a str) -> Self {
        Self {
            headers,
            peer,
            path,
        }
    }

    /// First `X-Forwarded-For` entry, else the peer address, else `"unknown"`.
    pub fn client_ip(&self) -> String {
        self.headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.peer.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Non-empty `X-Client-ID`.
    pub fn client_id(&self) -> Option<&'a str> {
        header_str(self.headers, CLIENT_ID_HEADER)
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Credential for `scheme` from the `Authorization` header.
fn authorization<'h>(headers: &'h HeaderMap, scheme: &str) -> Option<&'h str> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (given, credential) = value.split_once(' ')?;
    given
        .eq_ignore_ascii_case(scheme)
        .then(|| credential.trim())
        .filter(|c| !c.is_empty())
}

fn decode_basic(credential: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(credential).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The admission state machine.
pub struct AuthMiddleware {
    enabled: bool,
    auth_type: AuthType,
    static_api_key: Option<SecretString>,
    users: Option<Arc<dyn UserStore>>,
    jwt: Option<Arc<JwtManager>>,
    oauth: Option<Arc<OAuthManager>>,
    limiter: Arc<dyn RateLimit>,
}

impl AuthMiddleware {
    pub fn builder(auth_type: AuthType) -> AuthMiddlewareBuilder {
        AuthMiddlewareBuilder {
            enabled: true,
            auth_type,
            static_api_key: None,
            users: None,
            jwt: None,
            oauth: None,
            limiter: Arc::new(Unlimited),
        }
    }

    /// A middleware that only applies the shared rate limits.
    pub fn disabled(limiter: Arc<dyn RateLimit>) -> Self {
        Self {
            enabled: false,
            auth_type: AuthType::default(),
            static_api_key: None,
            users: None,
            jwt: None,
            oauth: None,
            limiter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimit> {
        &self.limiter
    }

    /// Apply only the global and per-endpoint limits. Used for routes that
    /// take no credential.
    pub fn check_shared_limits(&self, request: &RequestMeta<'_>) -> Result<(), Denial> {
        self.check_shared_limits_at(request, Instant::now())
    }

    pub fn check_shared_limits_at(
        &self,
        request: &RequestMeta<'_>,
        now: Instant,
    ) -> Result<(), Denial> {
        let ip = request.client_ip();
        self.limiter
            .check_shared_limits_at(&ip, request.path, now)
            .map_err(|e| {
                warn!(ip = %ip, path = request.path, scope = %e.scope, "Request rate limited");
                Denial::rate_limited(e.retry_after)
            })
    }

    /// Decide whether the request may proceed.
    pub async fn authorize(&self, request: &RequestMeta<'_>) -> Admission {
        self.authorize_at(request, Instant::now()).await
    }

    /// [`authorize`](Self::authorize) with the rate-limit clock supplied.
    pub async fn authorize_at(&self, request: &RequestMeta<'_>, now: Instant) -> Admission {
        let ip = request.client_ip();
        record_ip(&ip);

        if !self.enabled {
            return match self.check_shared_limits_at(request, now) {
                Ok(()) => Admission::Disabled,
                Err(denial) => Admission::Denied(denial),
            };
        }

        let client_id = request.client_id();
        if let Err(e) = self.limiter.check_limit_at(&ip, request.path, client_id, now) {
            warn!(ip = %ip, client = ?client_id, scope = %e.scope, "Authentication rate limited");
            return Admission::Denied(Denial::rate_limited(e.retry_after));
        }

        match self.authenticate(request.headers).await {
            Ok(user) => {
                self.limiter.record_success_at(&ip, client_id, now);
                info!(ip = %ip, user = %user.username, method = ?user.method, "Request admitted");
                Admission::Admitted(user)
            }
            Err(e) if e.is_authentication_failure() => {
                warn!(ip = %ip, auth_type = ?self.auth_type, reason = %e, "Authentication failed");
                Admission::Denied(Denial::Unauthorized)
            }
            Err(e) => {
                error!(ip = %ip, auth_type = ?self.auth_type, error = %e, "Authentication could not complete");
                Admission::Denied(Denial::Unauthorized)
            }
        }
    }

    async fn authenticate(&self, headers: &HeaderMap) -> AuthResult<AuthUser> {
        match self.auth_type {
            AuthType::ApiKey => {
                let key = header_str(headers, API_KEY_HEADER).ok_or(AuthError::InvalidCredentials)?;
                self.authenticate_api_key(key)
            }
            AuthType::Basic => {
                let (username, password) = authorization(headers, "Basic")
                    .and_then(decode_basic)
                    .ok_or(AuthError::InvalidCredentials)?;
                self.authenticate_basic(username, password).await
            }
            AuthType::Jwt => {
                let token = authorization(headers, "Bearer").ok_or(AuthError::InvalidToken)?;
                let jwt = self.jwt.as_ref().ok_or(ConfigError::MissingSetting("auth.jwt"))?;
                let claims = jwt.validate_token(token).await?;
                let role = claims
                    .get("role")
                    .and_then(|r| r.as_str())
                    .unwrap_or(DEFAULT_ROLE)
                    .to_string();
                Ok(AuthUser {
                    username: claims.sub.clone(),
                    role,
                    method: AuthMethod::Jwt,
                    claims: Some(claims),
                })
            }
            AuthType::OAuth => {
                let token = authorization(headers, "Bearer").ok_or(AuthError::InvalidToken)?;
                let oauth = self
                    .oauth
                    .as_ref()
                    .ok_or(ConfigError::MissingSetting("auth.oauth.providers"))?;
                let record = oauth.validate_token(token).await?;
                Ok(AuthUser {
                    username: record.user_id,
                    role: DEFAULT_ROLE.to_string(),
                    method: AuthMethod::OAuth,
                    claims: None,
                })
            }
        }
    }

    fn authenticate_api_key(&self, key: &str) -> AuthResult<AuthUser> {
        if let Some(expected) = &self.static_api_key {
            if expected.matches(key) {
                debug!("Static API key accepted");
                return Ok(AuthUser {
                    username: STATIC_KEY_USER.to_string(),
                    role: STATIC_KEY_ROLE.to_string(),
                    method: AuthMethod::ApiKey,
                    claims: None,
                });
            }
        }

        let users = self.users.as_ref().ok_or(AuthError::InvalidCredentials)?;
        let user = users.get_user_by_api_key(key)?;
        Ok(AuthUser {
            username: user.username,
            role: user.role,
            method: AuthMethod::ApiKey,
            claims: None,
        })
    }

    async fn authenticate_basic(&self, username: String, password: String) -> AuthResult<AuthUser> {
        let users = self
            .users
            .clone()
            .ok_or(ConfigError::MissingSetting("auth.userStore"))?;

        // Argon2 verification stays off the async workers.
        let user = tokio::task::spawn_blocking(move || {
            users.get_user_by_credentials(&username, &password)
        })
        .await
        .map_err(|e| AuthError::Internal(format!("credential check aborted: {e}")))??;

        Ok(AuthUser {
            username: user.username,
            role: user.role,
            method: AuthMethod::Basic,
            claims: None,
        })
    }
}

/// Builder for [`AuthMiddleware`].
pub struct AuthMiddlewareBuilder {
    enabled: bool,
    auth_type: AuthType,
    static_api_key: Option<SecretString>,
    users: Option<Arc<dyn UserStore>>,
    jwt: Option<Arc<JwtManager>>,
    oauth: Option<Arc<OAuthManager>>,
    limiter: Arc<dyn RateLimit>,
}

impl AuthMiddlewareBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn static_api_key(mut self, key: Option<SecretString>) -> Self {
        self.static_api_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn jwt(mut self, jwt: Arc<JwtManager>) -> Self {
        self.jwt = Some(jwt);
        self
    }

    pub fn oauth(mut self, oauth: Arc<OAuthManager>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Fails when the component the auth type needs was not supplied.
    pub fn build(self) -> Result<AuthMiddleware, ConfigError> {
        if self.enabled {
            match self.auth_type {
                AuthType::ApiKey if self.users.is_none() && self.static_api_key.is_none() => {
                    return Err(ConfigError::MissingSetting("auth.apiKey"));
                }
                AuthType::Basic if self.users.is_none() => {
                    return Err(ConfigError::MissingSetting("auth.userStore"));
                }
                AuthType::Jwt if self.jwt.is_none() => {
                    return Err(ConfigError::MissingSetting("auth.jwt"));
                }
                AuthType::OAuth if self.oauth.is_none() => {
                    return Err(ConfigError::MissingSetting("auth.oauth.providers"));
                }
                _ => {}
            }
        }

        Ok(AuthMiddleware {
            enabled: self.enabled,
            auth_type: self.auth_type,
            static_api_key: self.static_api_key,
            users: self.users,
            jwt: self.jwt,
            oauth: self.oauth,
            limiter: self.limiter,
        })
    }
}
