//! OAuth 2.0 authorization-code and refresh-token flows.
//!
//! Tokens obtained from a provider are parked under the flow's `state` until
//! the identity behind them is resolved, then stored bound to
//! `"<provider>:<subject>"`.

pub mod pending;
pub mod types;

pub use pending::{PendingGrants, GRANT_TTL};
pub use types::{OAuthSession, TokenResponse, UserInfo};

use crate::config::{OAuthConfig, ProviderConfig};
use crate::error::{AuthError, AuthResult, ConfigError, ProviderError};
use crate::tokens::{Token, TokenStore, TokenType};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use reqwest::header::{ACCEPT, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use url::Url;
use warden_common_log::spans::provider_span;
use warden_common_secret::redact_token;

/// Bound on every outbound provider call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime given to provider refresh tokens.
const REFRESH_TOKEN_DAYS: i64 = 30;

/// Lifetime given to access tokens whose response omits `expires_in`.
const DEFAULT_ACCESS_SECS: i64 = 3600;

/// Longest access-token lifetime accepted from a provider (one year).
const MAX_ACCESS_SECS: u64 = 365 * 24 * 60 * 60;

/// Local lifetime for a provider access token, clamped to
/// [`MAX_ACCESS_SECS`].
fn access_lifetime(expires_in: Option<u64>) -> ChronoDuration {
    let Some(secs) = expires_in else {
        return ChronoDuration::seconds(DEFAULT_ACCESS_SECS);
    };
    if secs > MAX_ACCESS_SECS {
        warn!(expires_in = secs, "Provider token lifetime clamped to one year");
    }
    ChronoDuration::try_seconds(secs.min(MAX_ACCESS_SECS) as i64)
        .unwrap_or_else(|| ChronoDuration::seconds(DEFAULT_ACCESS_SECS))
}

/// User-info endpoint for a provider: the configured override, else the
/// built-in endpoint for well-known provider names.
pub fn user_info_endpoint(name: &str, provider: &ProviderConfig) -> Result<String, ConfigError> {
    if let Some(url) = &provider.user_info_url {
        return Ok(url.clone());
    }

    let url = match name.to_ascii_lowercase().as_str() {
        "google" => "https://www.googleapis.com/oauth2/v3/userinfo",
        "github" => "https://api.github.com/user",
        "microsoft" => "https://graph.microsoft.com/oidc/userinfo",
        "gitlab" => "https://gitlab.com/api/v4/user",
        _ => return Err(ConfigError::UnknownProvider(name.to_string())),
    };
    Ok(url.to_string())
}

#[derive(Debug)]
struct Provider {
    config: ProviderConfig,
    user_info_url: String,
}

/// Drives authorization-code logins against the configured providers.
pub struct OAuthManager {
    providers: HashMap<String, Provider>,
    store: Arc<dyn TokenStore>,
    http: reqwest::Client,
    pending: PendingGrants,
}

impl OAuthManager {
    pub fn new(config: &OAuthConfig, store: Arc<dyn TokenStore>) -> AuthResult<Self> {
        Self::with_timeout(config, store, PROVIDER_TIMEOUT)
    }

    pub fn with_timeout(
        config: &OAuthConfig,
        store: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let mut providers = HashMap::with_capacity(config.providers.len());
        for (name, provider) in &config.providers {
            for (field, value) in [
                ("authUrl", &provider.auth_url),
                ("tokenUrl", &provider.token_url),
                ("redirectUrl", &provider.redirect_url),
            ] {
                Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                    field: format!("auth.oauth.providers.{name}.{field}"),
                    reason: e.to_string(),
                })?;
            }

            providers.insert(
                name.clone(),
                Provider {
                    user_info_url: user_info_endpoint(name, provider)?,
                    config: provider.clone(),
                },
            );
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("failed to build HTTP client: {e}")))?;

        info!(providers = providers.len(), "OAuth manager ready");
        Ok(Self {
            providers,
            store,
            http,
            pending: PendingGrants::default(),
        })
    }

    fn provider(&self, name: &str) -> AuthResult<&Provider> {
        self.providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()).into())
    }

    /// Names of the configured providers.
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A fresh unguessable `state` value.
    pub fn generate_state() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Build the authorization URL and register `state` for the callback.
    pub fn get_auth_url(&self, provider: &str, state: &str) -> AuthResult<String> {
        let p = self.provider(provider)?;
        let mut url = Url::parse(&p.config.auth_url).map_err(|e| ConfigError::InvalidUrl {
            field: format!("auth.oauth.providers.{provider}.authUrl"),
            reason: e.to_string(),
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &p.config.client_id)
            .append_pair("redirect_uri", &p.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("scope", &p.config.scopes.join(" "));

        self.pending.register(state, provider, Instant::now())?;
        Ok(url.into())
    }

    /// Exchange an authorization code. The tokens stay parked under `state`
    /// until [`complete_login`](Self::complete_login).
    pub async fn exchange_code_for_token(
        &self,
        provider: &str,
        code: &str,
        state: &str,
    ) -> AuthResult<TokenResponse> {
        let p = self.provider(provider)?;
        self.pending.check_awaiting(state, provider, Instant::now())?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", p.config.redirect_url.as_str()),
            ("client_id", p.config.client_id.as_str()),
            ("client_secret", p.config.client_secret.expose().as_str()),
        ];
        let response = self.post_token(provider, &p.config.token_url, &form).await?;

        self.pending
            .attach(state, provider, response.clone(), Instant::now())?;
        debug!(provider, "Authorization code exchanged");
        Ok(response)
    }

    /// Resolve the identity behind a parked grant and store its tokens.
    pub async fn complete_login(&self, provider: &str, state: &str) -> AuthResult<OAuthSession> {
        let response = self.pending.take(state, provider, Instant::now())?;
        let user_info = self.get_user_info(provider, &response.access_token).await?;
        let user_id = format!("{provider}:{}", user_info.id);

        let access = self.store_access_token(&user_id, &response).await?;
        let refresh_token = match &response.refresh_token {
            Some(value) => {
                self.store_refresh_token(&user_id, value).await?;
                Some(value.clone())
            }
            None => None,
        };

        info!(provider, user = %user_id, "OAuth login completed");
        Ok(OAuthSession {
            user_id,
            provider: provider.to_string(),
            user_info,
            access_token: access.value,
            refresh_token,
            expires_at: access.expires_at,
        })
    }

    /// Fetch and normalize the provider's view of the token's owner.
    pub async fn get_user_info(&self, provider: &str, access_token: &str) -> AuthResult<UserInfo> {
        let p = self.provider(provider)?;

        let response = self
            .http
            .get(&p.user_info_url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "warden")
            .send()
            .instrument(provider_span(provider, "user_info"))
            .await
            .map_err(ProviderError::from)?;

        let raw: serde_json::Value = Self::read_json(provider, response).await?;
        UserInfo::from_raw(raw).ok_or_else(|| {
            ProviderError::InvalidResponse("user info carries no id or sub".into()).into()
        })
    }

    /// Refresh tokens for the owner recorded against `refresh_token`.
    ///
    /// Unknown refresh tokens are rejected without contacting the provider.
    pub async fn refresh_token(
        &self,
        provider: &str,
        refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        let p = self.provider(provider)?;

        let record = match self.store.get_token(refresh_token).await {
            Ok(t) if t.token_type == TokenType::Refresh && t.user_id.starts_with(&format!("{provider}:")) => t,
            _ => {
                warn!(provider, token = %redact_token(refresh_token), "Refresh rejected before provider call");
                return Err(AuthError::InvalidToken);
            }
        };
        let owner = record.user_id;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", p.config.client_id.as_str()),
            ("client_secret", p.config.client_secret.expose().as_str()),
        ];
        let response = self.post_token(provider, &p.config.token_url, &form).await?;

        self.revoke_latest_access_token(&owner).await;
        self.store_access_token(&owner, &response).await?;

        if let Some(rotated) = response.refresh_token.as_deref().filter(|r| *r != refresh_token) {
            self.store_refresh_token(&owner, rotated).await?;
            if let Err(e) = self.store.revoke_token(refresh_token).await {
                warn!(user = %owner, error = %e, "Failed to revoke rotated refresh token");
            }
        }

        info!(provider, user = %owner, "OAuth tokens refreshed");
        Ok(response)
    }

    /// Validate a provider access token held in the store.
    pub async fn validate_token(&self, token: &str) -> AuthResult<Token> {
        match self.store.get_token(token).await {
            Ok(record) if record.token_type == TokenType::Access => Ok(record),
            Ok(_) => {
                warn!(token = %redact_token(token), reason = "wrong token type", "Token rejected");
                Err(AuthError::InvalidToken)
            }
            Err(e) => {
                warn!(token = %redact_token(token), reason = %e, "Token rejected");
                Err(AuthError::InvalidToken)
            }
        }
    }

    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        self.store.revoke_token(token).await
    }

    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize> {
        self.store.revoke_all_user_tokens(user_id).await
    }

    /// Drop provisional grants older than [`GRANT_TTL`].
    pub fn discard_expired_grants(&self) -> usize {
        self.discard_expired_grants_at(Instant::now())
    }

    pub fn discard_expired_grants_at(&self, now: Instant) -> usize {
        let dropped = self.pending.discard_expired(now);
        if dropped > 0 {
            debug!(dropped, "Discarded expired OAuth grants");
        }
        dropped
    }

    pub fn pending_grants(&self) -> usize {
        self.pending.len()
    }

    /// Periodically discard expired grants until the handle is aborted.
    pub fn spawn_cleanup_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
            interval.tick().await;
            loop {
                interval.tick().await;
                self.discard_expired_grants();
            }
        })
    }

    async fn post_token(
        &self,
        provider: &str,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> AuthResult<TokenResponse> {
        let response = self
            .http
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .instrument(provider_span(provider, "token"))
            .await
            .map_err(ProviderError::from)?;

        Self::read_json(provider, response).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        provider: &str,
        response: reqwest::Response,
    ) -> AuthResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider, status = status.as_u16(), "Provider call failed");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(ProviderError::from)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()).into())
    }

    async fn store_access_token(&self, owner: &str, response: &TokenResponse) -> AuthResult<Token> {
        let lifetime = access_lifetime(response.expires_in);
        let token = Token::new(owner, &response.access_token, TokenType::Access, lifetime);
        self.store.store_token(token.clone()).await?;
        Ok(token)
    }

    async fn store_refresh_token(&self, owner: &str, value: &str) -> AuthResult<()> {
        let token = Token::new(
            owner,
            value,
            TokenType::Refresh,
            ChronoDuration::days(REFRESH_TOKEN_DAYS),
        );
        self.store.store_token(token).await
    }

    /// Best effort: failures are logged, not returned.
    async fn revoke_latest_access_token(&self, owner: &str) {
        let now = Utc::now();
        let latest = match self.store.get_tokens_by_user_id(owner).await {
            Ok(tokens) => tokens
                .into_iter()
                .filter(|t| t.token_type == TokenType::Access && t.is_usable_at(now))
                // Ties resolve to the later entry, i.e. the last stored.
                .max_by_key(|t| t.created_at),
            Err(e) => {
                warn!(user = %owner, error = %e, "Could not list tokens before refresh");
                None
            }
        };

        if let Some(token) = latest {
            if let Err(e) = self.store.revoke_token(&token.value).await {
                warn!(user = %owner, error = %e, "Could not revoke previous access token");
            }
        }
    }
}
