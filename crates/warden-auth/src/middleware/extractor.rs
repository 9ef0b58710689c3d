//! Handler extractors for the identity attached by [`AuthLayer`](super::AuthLayer).

use super::{AuthUser, Denial};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Extractor for an authenticated caller. Rejects with 401 when absent.
pub struct Auth(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = Denial;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(Auth)
            .ok_or(Denial::Unauthorized)
    }
}

/// Extractor for an optional caller.
pub struct MaybeAuth(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuth(parts.extensions.get::<AuthUser>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::AuthMethod;
    use axum::http::Request;

    fn user() -> AuthUser {
        AuthUser {
            username: "alice".into(),
            role: "user".into(),
            method: AuthMethod::ApiKey,
            claims: None,
        }
    }

    #[tokio::test]
    async fn test_auth_extractor() {
        let (mut parts, _) = Request::new(()).into_parts();
        assert!(matches!(
            Auth::from_request_parts(&mut parts, &()).await,
            Err(Denial::Unauthorized)
        ));

        parts.extensions.insert(user());
        let Auth(found) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(found.username, "alice");
    }

    #[tokio::test]
    async fn test_maybe_auth_extractor() {
        let (mut parts, _) = Request::new(()).into_parts();
        let MaybeAuth(found) = MaybeAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(found.is_none());

        parts.extensions.insert(user());
        let MaybeAuth(found) = MaybeAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(found.map(|u| u.role).as_deref(), Some("user"));
    }
}
