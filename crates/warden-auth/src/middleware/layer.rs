//! Tower layers running [`AuthMiddleware`] in front of a service.

use super::{Admission, AuthMiddleware, RequestMeta};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::Response,
    response::IntoResponse,
};
use futures::future::BoxFuture;
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::Instrument;
use warden_common_log::spans::request_span;

/// Attaches an [`AuthUser`](super::AuthUser) to admitted requests and answers
/// denied ones directly.
#[derive(Clone)]
pub struct AuthLayer {
    middleware: Arc<AuthMiddleware>,
}

impl AuthLayer {
    pub fn new(middleware: Arc<AuthMiddleware>) -> Self {
        Self { middleware }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            middleware: self.middleware.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    middleware: Arc<AuthMiddleware>,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response<Body>, Error = std::convert::Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let middleware = self.middleware.clone();
        let mut inner = self.inner.clone();
        let span = request_span(req.method().as_str(), req.uri().path());

        Box::pin(
            async move {
                let (mut parts, body) = req.into_parts();
                let peer = parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());

                let admission = middleware
                    .authorize(&RequestMeta::new(&parts.headers, peer, parts.uri.path()))
                    .await;
                match admission {
                    Admission::Disabled => {}
                    Admission::Admitted(user) => {
                        parts.extensions.insert(user);
                    }
                    Admission::Denied(denial) => return Ok(denial.into_response()),
                }

                inner.call(Request::from_parts(parts, body)).await
            }
            .instrument(span),
        )
    }
}

/// Applies the shared rate limits of an [`AuthMiddleware`] without asking
/// for credentials. Fits public routes such as the OAuth redirects.
#[derive(Clone)]
pub struct RateLimitLayer {
    middleware: Arc<AuthMiddleware>,
}

impl RateLimitLayer {
    pub fn new(middleware: Arc<AuthMiddleware>) -> Self {
        Self { middleware }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            middleware: self.middleware.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    middleware: Arc<AuthMiddleware>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<Body>, Error = std::convert::Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let verdict = self
            .middleware
            .check_shared_limits(&RequestMeta::new(req.headers(), peer, req.uri().path()));

        match verdict {
            Ok(()) => {
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(req).await })
            }
            Err(denial) => Box::pin(async move { Ok(denial.into_response()) }),
        }
    }
}
