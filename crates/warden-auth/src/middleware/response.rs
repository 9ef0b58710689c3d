//! Denial responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

pub const UNAUTHORIZED_MESSAGE: &str = "Authentication failed";
pub const RATE_LIMITED_MESSAGE: &str = "Too many authentication attempts";

/// Why a request was refused. The response body never says more than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthorized,
    RateLimited { retry_after: Option<Duration> },
}

impl Denial {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Unauthorized => UNAUTHORIZED_MESSAGE,
            Self::RateLimited { .. } => RATE_LIMITED_MESSAGE,
        }
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(json!({ "error": self.message() }))).into_response();

        if let Self::RateLimited {
            retry_after: Some(wait),
        } = self
        {
            // Whole seconds, rounded up so clients never retry early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }

        response
    }
}
