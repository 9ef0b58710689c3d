use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tower::ServiceExt;
use warden_auth::config::{AuthConfig, AuthType};
use warden_auth::{Auth, AuthStack, MaybeAuth};
use warden_common_secret::SecretString;

async fn whoami(Auth(user): Auth) -> Json<Value> {
    Json(json!({ "username": user.username, "role": user.role, "method": user.method }))
}

async fn greeting(MaybeAuth(user): MaybeAuth) -> String {
    match user {
        Some(user) => format!("hello {}", user.username),
        None => "hello stranger".to_string(),
    }
}

fn jwt_stack(max_attempts: u32) -> AuthStack {
    let mut config = AuthConfig {
        enabled: true,
        auth_type: AuthType::Jwt,
        ..Default::default()
    };
    config.jwt.secret = Some(SecretString::from("router-test-secret-0123456789abcd"));
    config.rate_limit.max_attempts = max_attempts;
    config.rate_limit.window = 60;
    AuthStack::from_config(&config).unwrap()
}

fn app(stack: &AuthStack) -> Router {
    Router::new()
        .route("/api/whoami", get(whoami))
        .layer(stack.layer())
}

fn request(ip: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/api/whoami")
        .header("x-forwarded-for", ip);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_valid_bearer_reaches_handler() {
    let stack = jwt_stack(5);
    let jwt = stack.jwt.clone().unwrap();
    let mut claims = Map::new();
    claims.insert("role".into(), json!("admin"));
    let token = jwt.generate_token("root", claims).await.unwrap();

    let response = app(&stack)
        .oneshot(request("198.51.100.7", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"username": "root", "role": "admin", "method": "jwt"})
    );
}

#[tokio::test]
async fn test_denials_use_fixed_bodies() {
    let stack = jwt_stack(1);
    let app = app(&stack);

    let response = app
        .clone()
        .oneshot(request("198.51.100.8", Some("not-a-jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({"error": "Authentication failed"}));

    let response = app
        .oneshot(request("198.51.100.8", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        json_body(response).await,
        json!({"error": "Too many authentication attempts"})
    );
}

#[tokio::test]
async fn test_revoked_token_is_rejected_at_the_edge() {
    let stack = jwt_stack(5);
    let jwt = stack.jwt.clone().unwrap();
    let token = jwt.generate_token("temp", Map::new()).await.unwrap();
    let app = app(&stack);

    let ok = app
        .clone()
        .oneshot(request("203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    jwt.revoke_token(&token).await.unwrap();
    let denied = app
        .oneshot(request("203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_auth_passes_through_without_identity() {
    let stack = AuthStack::from_config(&AuthConfig::default()).unwrap();
    let app = Router::new()
        .route("/hello", get(greeting))
        .route("/api/whoami", get(whoami))
        .layer(stack.layer());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello stranger");

    // Handlers that require an identity still refuse.
    let response = app
        .oneshot(Request::builder().uri("/api/whoami").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
