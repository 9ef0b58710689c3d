use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warden_auth::config::{OAuthConfig, ProviderConfig};
use warden_auth::tokens::{MemoryTokenStore, TokenStore, TokenType};
use warden_auth::{AuthError, OAuthManager, ProviderError};
use warden_common_secret::SecretString;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> OAuthConfig {
    let mut config = OAuthConfig::default();
    config.providers.insert(
        "acme".into(),
        ProviderConfig {
            client_id: "warden-client".into(),
            client_secret: SecretString::from("client-secret"),
            auth_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            redirect_url: "http://localhost:8080/oauth/acme/callback".into(),
            scopes: vec!["profile".into()],
            user_info_url: Some(format!("{}/userinfo", server.uri())),
        },
    );
    config
}

fn manager(server: &MockServer) -> (OAuthManager, Arc<dyn TokenStore>) {
    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let oauth = OAuthManager::new(&config(server), store.clone()).unwrap();
    (oauth, store)
}

async fn mount_code_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-1"))
        .and(body_string_contains("client_secret=client-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1"
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_user_info(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "42",
            "email": "dev@acme.test",
            "name": "Dev"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_binds_tokens_only_after_identity_resolves() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    mount_user_info(&server, "at-1").await;
    let (oauth, store) = manager(&server);

    let state = OAuthManager::generate_state();
    let url = oauth.get_auth_url("acme", &state).unwrap();
    assert!(url.starts_with(&format!("{}/authorize?", server.uri())));

    let response = oauth
        .exchange_code_for_token("acme", "code-1", &state)
        .await
        .unwrap();
    assert_eq!(response.refresh_token.as_deref(), Some("rt-1"));

    // Nothing reaches the store before the owner is known.
    assert!(store.get_token("at-1").await.is_err());

    let session = oauth.complete_login("acme", &state).await.unwrap();
    assert_eq!(session.user_id, "acme:42");
    assert_eq!(session.user_info.email.as_deref(), Some("dev@acme.test"));

    let access = oauth.validate_token("at-1").await.unwrap();
    assert_eq!(access.user_id, "acme:42");
    assert_eq!(access.token_type, TokenType::Access);

    // Refresh tokens are not bearer credentials.
    assert!(oauth.validate_token("rt-1").await.is_err());
    assert_eq!(store.get_token("rt-1").await.unwrap().user_id, "acme:42");

    // The state is single use.
    assert!(matches!(
        oauth.complete_login("acme", &state).await,
        Err(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_absurd_provider_lifetime_is_clamped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-long",
            "expires_in": 100_000_000_000_000_000u64
        })))
        .mount(&server)
        .await;
    mount_user_info(&server, "at-long").await;
    let (oauth, store) = manager(&server);

    let state = OAuthManager::generate_state();
    oauth.get_auth_url("acme", &state).unwrap();
    let response = oauth
        .exchange_code_for_token("acme", "code-1", &state)
        .await
        .unwrap();
    assert_eq!(response.expires_in, Some(100_000_000_000_000_000));

    let session = oauth.complete_login("acme", &state).await.unwrap();
    let ceiling = chrono::Utc::now() + chrono::Duration::days(366);
    assert!(session.expires_at <= ceiling);

    let stored = store.get_token("at-long").await.unwrap();
    assert!(stored.expires_at <= ceiling);
    assert!(oauth.validate_token("at-long").await.is_ok());
}

#[tokio::test]
async fn test_refresh_rotates_for_the_same_owner() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    mount_user_info(&server, "at-1").await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 600,
            "refresh_token": "rt-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (oauth, store) = manager(&server);

    let state = OAuthManager::generate_state();
    oauth.get_auth_url("acme", &state).unwrap();
    oauth
        .exchange_code_for_token("acme", "code-1", &state)
        .await
        .unwrap();
    oauth.complete_login("acme", &state).await.unwrap();

    let refreshed = oauth.refresh_token("acme", "rt-1").await.unwrap();
    assert_eq!(refreshed.access_token, "at-2");

    assert!(oauth.validate_token("at-1").await.is_err());
    assert_eq!(oauth.validate_token("at-2").await.unwrap().user_id, "acme:42");
    assert!(store.get_token("rt-1").await.is_err());
    assert_eq!(
        store.get_token("rt-2").await.unwrap().token_type,
        TokenType::Refresh
    );
}

#[tokio::test]
async fn test_unknown_refresh_token_never_reaches_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let (oauth, _) = manager(&server);

    assert!(matches!(
        oauth.refresh_token("acme", "forged").await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_exchange_without_issued_state_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let (oauth, _) = manager(&server);

    assert!(matches!(
        oauth.exchange_code_for_token("acme", "code-1", "made-up").await,
        Err(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_provider_error_status_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;
    let (oauth, _) = manager(&server);

    let state = OAuthManager::generate_state();
    oauth.get_auth_url("acme", &state).unwrap();
    match oauth.exchange_code_for_token("acme", "stale", &state).await {
        Err(AuthError::Provider(ProviderError::Status { status, body })) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "late"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let oauth = OAuthManager::with_timeout(
        &config(&server),
        Arc::new(MemoryTokenStore::new()),
        Duration::from_millis(200),
    )
    .unwrap();

    let state = OAuthManager::generate_state();
    oauth.get_auth_url("acme", &state).unwrap();
    assert!(matches!(
        oauth.exchange_code_for_token("acme", "code", &state).await,
        Err(AuthError::Provider(ProviderError::Timeout))
    ));
}

#[tokio::test]
async fn test_user_info_without_identifier_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "x@acme.test"})))
        .mount(&server)
        .await;
    let (oauth, _) = manager(&server);

    assert!(matches!(
        oauth.get_user_info("acme", "at-x").await,
        Err(AuthError::Provider(ProviderError::InvalidResponse(_)))
    ));
}
