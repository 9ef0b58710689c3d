//! HTTP routes of the reference server.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};
use warden_auth::{Auth, AuthError, AuthStack, ConfigError, OAuthManager};

/// Build the application router.
///
/// Only `/api/*` sits behind the authentication layer. The OAuth redirect
/// endpoints take no credentials but still count against the global and
/// per-endpoint limits. Health checks are unmetered.
pub fn router(stack: Arc<AuthStack>) -> Router {
    let api = Router::new()
        .route("/api/whoami", get(whoami))
        .layer(stack.layer());

    let oauth = Router::new()
        .route("/oauth/:provider/login", get(oauth_login))
        .route("/oauth/:provider/callback", get(oauth_callback))
        .layer(stack.rate_limit_layer());

    Router::new()
        .route("/health", get(health))
        .merge(oauth)
        .merge(api)
        .with_state(stack)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn whoami(Auth(user): Auth) -> Json<Value> {
    Json(json!({
        "username": user.username,
        "role": user.role,
        "method": user.method,
    }))
}

async fn oauth_login(
    State(stack): State<Arc<AuthStack>>,
    Path(provider): Path<String>,
) -> Result<Redirect, ApiError> {
    let oauth = oauth(&stack)?;
    let state = OAuthManager::generate_state();
    let url = oauth.get_auth_url(&provider, &state)?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Session details handed back to the browser after a login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

async fn oauth_callback(
    State(stack): State<Arc<AuthStack>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<LoginResponse>, ApiError> {
    let oauth = oauth(&stack)?;

    if let Some(reason) = params.error {
        warn!(provider = %provider, reason = %reason, "Provider declined authorization");
        return Err(ApiError::BadRequest("authorization was declined"));
    }
    let (Some(code), Some(state)) = (params.code, params.state) else {
        return Err(ApiError::BadRequest("code and state are required"));
    };

    oauth.exchange_code_for_token(&provider, &code, &state).await?;
    let session = oauth.complete_login(&provider, &state).await?;

    Ok(Json(LoginResponse {
        user_id: session.user_id,
        provider: session.provider,
        email: session.user_info.email,
        name: session.user_info.name,
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_at: session.expires_at,
    }))
}

fn oauth(stack: &AuthStack) -> Result<&OAuthManager, ApiError> {
    stack.oauth.as_deref().ok_or(ApiError::NotFound)
}

/// Errors surfaced by the non-middleware routes.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(&'static str),
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Configuration(ConfigError::UnknownProvider(_)) => ApiError::NotFound,
            other => ApiError::Auth(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "unknown provider"),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Auth(err) => {
                let status = err.status_code();
                if status.is_server_error() {
                    error!(error = %err, "OAuth request failed");
                } else {
                    warn!(error = %err, "OAuth request rejected");
                }
                let message = match status {
                    StatusCode::UNAUTHORIZED => "invalid or expired state",
                    StatusCode::BAD_GATEWAY => "identity provider error",
                    StatusCode::TOO_MANY_REQUESTS => "too many requests",
                    _ => "internal error",
                };
                (status, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;
    use warden_auth::config::{AuthConfig, AuthType, EndpointLimit, ProviderConfig};
    use warden_common_secret::SecretString;

    fn stack(config: AuthConfig) -> Arc<AuthStack> {
        Arc::new(AuthStack::from_config(&config).unwrap())
    }

    fn with_provider() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.oauth.providers.insert(
            "google".into(),
            ProviderConfig {
                client_id: "cid".into(),
                client_secret: SecretString::from("secret"),
                auth_url: "https://accounts.example.com/o/auth".into(),
                token_url: "https://accounts.example.com/o/token".into(),
                redirect_url: "http://localhost:8080/oauth/google/callback".into(),
                scopes: vec!["email".into()],
                user_info_url: None,
            },
        );
        config
    }

    async fn send(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let mut config = AuthConfig {
            enabled: true,
            auth_type: AuthType::ApiKey,
            ..Default::default()
        };
        config.api_key = Some(SecretString::from("k"));
        let response = send(router(stack(config)), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_redirects_to_provider() {
        let response = send(router(stack(with_provider())), "/oauth/google/login").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.example.com/o/auth?"));
        assert!(location.contains("state="));
    }

    #[tokio::test]
    async fn test_login_respects_endpoint_limit() {
        let mut config = with_provider();
        config.rate_limit.endpoint_limits.insert(
            "/oauth/google/login".into(),
            EndpointLimit {
                max_requests: 2,
                window: 60,
            },
        );
        let app = router(stack(config));

        for _ in 0..2 {
            let response = send(app.clone(), "/oauth/google/login").await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }
        let response = send(app.clone(), "/oauth/google/login").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // Other routes keep their own budget.
        let response = send(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_global_limit_covers_oauth_routes() {
        let mut config = with_provider();
        config.rate_limit.global_rate_limit = 1;
        let app = router(stack(config));

        let response = send(app.clone(), "/oauth/google/login").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let response = send(app, "/oauth/google/callback?code=abc&state=x").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let response = send(router(stack(with_provider())), "/oauth/nope/login").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(router(stack(AuthConfig::default())), "/oauth/google/login").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_callback_with_unissued_state_is_rejected() {
        let response = send(
            router(stack(with_provider())),
            "/oauth/google/callback?code=abc&state=forged",
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_without_code_is_bad_request() {
        let response = send(router(stack(with_provider())), "/oauth/google/callback?state=x").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
