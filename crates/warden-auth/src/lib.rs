//! Authentication and adaptive rate limiting for the Warden gateway.
//!
//! For every inbound request this crate decides whether the caller is who
//! they claim to be and whether they may proceed right now.
//!
//! - [`users`]: API-key and username/password credentials
//! - [`tokens`]: issued tokens, revocation and expiry
//! - [`jwt`]: signed bearer tokens checked against the token store
//! - [`oauth`]: authorization-code and refresh-token flows
//! - [`rate_limit`]: global, endpoint, IP and client budgets with a CIDR whitelist
//! - [`middleware`]: the admission state machine and its tower layer
//!
//! [`AuthStack::from_config`] wires all of them from one [`config::AuthConfig`].
//!
//! # Features
//!
//! - `redis` (default): the Redis token store

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod oauth;
mod persist;
pub mod rate_limit;
pub mod stack;
pub mod tokens;
pub mod users;

pub use error::{AuthError, AuthResult, ConfigError, ProviderError, StoreError};
pub use jwt::{Claims, JwtManager};
pub use middleware::{
    Admission, Auth, AuthLayer, AuthMethod, AuthMiddleware, AuthUser, Denial, MaybeAuth,
    RateLimitLayer, RequestMeta,
};
pub use oauth::OAuthManager;
pub use rate_limit::{RateLimit, RateLimitExceeded, RateLimiter, Scope};
pub use stack::AuthStack;
pub use tokens::{Token, TokenStore, TokenType};
pub use users::{NewUser, User, UserStore, UserUpdate};
