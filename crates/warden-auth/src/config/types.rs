//! Configuration types.
//!
//! Field names are snake_case so environment overrides map onto them
//! directly; file sources may use the camelCase spelling through aliases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use warden_common_secret::SecretString;

/// Top-level configuration of a Warden process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// Credential kind the middleware expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    ApiKey,
    Basic,
    OAuth,
    Jwt,
}

/// User store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStoreKind {
    #[default]
    Memory,
    File,
}

/// Token store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    Memory,
    File,
    Redis,
}

/// Authentication configuration (`auth.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    /// Static key accepted in `apikey` mode as the `api-key` admin identity.
    #[serde(default, alias = "apiKey", alias = "apikey")]
    pub api_key: Option<SecretString>,
    #[serde(default, alias = "userStore", alias = "userstore")]
    pub user_store: UserStoreKind,
    #[serde(default, alias = "storeFile", alias = "storefile")]
    pub store_file: Option<PathBuf>,
    #[serde(default, alias = "ipWhitelist", alias = "ipwhitelist")]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default, alias = "tokenStore", alias = "tokenstore")]
    pub token_store: TokenStoreConfig,
    #[serde(default, alias = "rateLimit", alias = "ratelimit")]
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_type: AuthType::default(),
            api_key: None,
            user_store: UserStoreKind::default(),
            store_file: None,
            ip_whitelist: Vec::new(),
            oauth: OAuthConfig::default(),
            jwt: JwtConfig::default(),
            token_store: TokenStoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// `auth.oauth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// One OAuth 2.0 provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(alias = "clientId", alias = "clientid")]
    pub client_id: String,
    #[serde(alias = "clientSecret", alias = "clientsecret")]
    pub client_secret: SecretString,
    #[serde(alias = "authUrl", alias = "authurl")]
    pub auth_url: String,
    #[serde(alias = "tokenUrl", alias = "tokenurl")]
    pub token_url: String,
    #[serde(alias = "redirectUrl", alias = "redirecturl")]
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Overrides the built-in user-info endpoint for well-known providers.
    #[serde(default, alias = "userInfoUrl", alias = "userinfourl")]
    pub user_info_url: Option<String>,
}

/// `auth.jwt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: Option<SecretString>,
    #[serde(default, alias = "publicKeyPath", alias = "publickeypath")]
    pub public_key_path: Option<PathBuf>,
    #[serde(default, alias = "privateKeyPath", alias = "privatekeypath")]
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(
        default = "default_expiration_minutes",
        alias = "expirationMinutes",
        alias = "expirationminutes"
    )]
    pub expiration_minutes: u64,
    #[serde(
        default = "default_refresh_expiration_minutes",
        alias = "refreshExpirationMinutes",
        alias = "refreshexpirationminutes"
    )]
    pub refresh_expiration_minutes: u64,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_expiration_minutes() -> u64 {
    60
}

fn default_refresh_expiration_minutes() -> u64 {
    7 * 24 * 60
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            public_key_path: None,
            private_key_path: None,
            algorithm: default_jwt_algorithm(),
            issuer: None,
            audience: None,
            expiration_minutes: default_expiration_minutes(),
            refresh_expiration_minutes: default_refresh_expiration_minutes(),
        }
    }
}

/// `auth.tokenStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStoreConfig {
    #[serde(rename = "type", default)]
    pub kind: TokenStoreKind,
    #[serde(default, alias = "filePath", alias = "filepath")]
    pub file_path: Option<PathBuf>,
    #[serde(default, alias = "redisUrl", alias = "redisurl")]
    pub redis_url: Option<String>,
}

/// Bucket algorithm for every bucket of one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    Counter,
    TokenBucket,
    /// Accepted for compatibility, behaves as `TokenBucket`.
    LeakyBucket,
}

/// Budget for one endpoint path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    #[serde(alias = "maxRequests", alias = "maxrequests")]
    pub max_requests: u32,
    /// Seconds.
    pub window: u64,
}

/// `auth.rateLimit`. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
    #[serde(
        default = "default_max_attempts",
        alias = "maxAttempts",
        alias = "maxattempts"
    )]
    pub max_attempts: u32,
    #[serde(default = "default_window")]
    pub window: u64,
    #[serde(
        default = "default_bucket_size",
        alias = "bucketSize",
        alias = "bucketsize"
    )]
    pub bucket_size: u32,
    #[serde(
        default = "default_refill_rate",
        alias = "refillRate",
        alias = "refillrate"
    )]
    pub refill_rate: f64,
    /// Per-client budget. Twice the per-IP budget when unset.
    #[serde(default, alias = "clientMaxAttempts", alias = "clientmaxattempts")]
    pub client_max_attempts: Option<u32>,
    #[serde(
        default = "default_true",
        alias = "ipBasedEnabled",
        alias = "ipbasedenabled"
    )]
    pub ip_based_enabled: bool,
    /// Requests per `window` across all callers; 0 disables the global budget.
    #[serde(default, alias = "globalRateLimit", alias = "globalratelimit")]
    pub global_rate_limit: u32,
    #[serde(default, alias = "endpointLimits", alias = "endpointlimits")]
    pub endpoint_limits: HashMap<String, EndpointLimit>,
    #[serde(
        default = "default_cleanup_interval",
        alias = "cleanupInterval",
        alias = "cleanupinterval"
    )]
    pub cleanup_interval: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window() -> u64 {
    300
}

fn default_bucket_size() -> u32 {
    10
}

fn default_refill_rate() -> f64 {
    0.1
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::default(),
            max_attempts: default_max_attempts(),
            window: default_window(),
            bucket_size: default_bucket_size(),
            refill_rate: default_refill_rate(),
            client_max_attempts: None,
            ip_based_enabled: true,
            global_rate_limit: 0,
            endpoint_limits: HashMap::new(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}
