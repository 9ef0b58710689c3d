//! Composition root for the authentication components.

use crate::config::{AuthConfig, AuthType, TokenStoreKind, UserStoreKind};
use crate::error::{AuthResult, ConfigError};
use crate::jwt::JwtManager;
use crate::middleware::{AuthLayer, AuthMiddleware, RateLimitLayer};
use crate::oauth::OAuthManager;
use crate::rate_limit::{self, RateLimit, RateLimiter, Unlimited};
use crate::tokens::{self, FileTokenStore, MemoryTokenStore, TokenStore};
use crate::users::{FileUserStore, MemoryUserStore, UserStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Every component built once from `auth.*`.
pub struct AuthStack {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub limiter: Arc<dyn RateLimit>,
    pub jwt: Option<Arc<JwtManager>>,
    pub oauth: Option<Arc<OAuthManager>>,
    pub middleware: Arc<AuthMiddleware>,
    cleanup_interval: Duration,
}

impl AuthStack {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let users: Arc<dyn UserStore> = match config.user_store {
            UserStoreKind::Memory => Arc::new(MemoryUserStore::new()),
            UserStoreKind::File => {
                let path = config
                    .store_file
                    .as_ref()
                    .ok_or(ConfigError::MissingSetting("auth.storeFile"))?;
                Arc::new(FileUserStore::open(path)?)
            }
        };

        let tokens = token_store(config)?;

        let limiter: Arc<dyn RateLimit> = if config.rate_limit.enabled {
            Arc::new(RateLimiter::from_config(
                &config.rate_limit,
                config.ip_whitelist.as_slice(),
            )?)
        } else {
            Arc::new(Unlimited)
        };

        let jwt = match config.auth_type {
            AuthType::Jwt => Some(Arc::new(JwtManager::new(&config.jwt, tokens.clone())?)),
            _ => None,
        };

        let oauth = if config.oauth.providers.is_empty() {
            None
        } else {
            Some(Arc::new(OAuthManager::new(&config.oauth, tokens.clone())?))
        };

        let middleware = if config.enabled {
            let mut builder = AuthMiddleware::builder(config.auth_type)
                .static_api_key(config.api_key.clone())
                .users(users.clone())
                .limiter(limiter.clone());
            if let Some(jwt) = &jwt {
                builder = builder.jwt(jwt.clone());
            }
            if let Some(oauth) = &oauth {
                builder = builder.oauth(oauth.clone());
            }
            builder.build()?
        } else {
            AuthMiddleware::disabled(limiter.clone())
        };

        info!(
            enabled = config.enabled,
            auth_type = ?config.auth_type,
            user_store = ?config.user_store,
            token_store = ?config.token_store.kind,
            rate_limit = config.rate_limit.enabled,
            "Authentication stack built"
        );

        Ok(Self {
            users,
            tokens,
            limiter,
            jwt,
            oauth,
            middleware: Arc::new(middleware),
            cleanup_interval: Duration::from_secs(config.rate_limit.cleanup_interval.max(1)),
        })
    }

    pub fn layer(&self) -> AuthLayer {
        AuthLayer::new(self.middleware.clone())
    }

    /// Shared limits only, for routes reachable without credentials.
    pub fn rate_limit_layer(&self) -> RateLimitLayer {
        RateLimitLayer::new(self.middleware.clone())
    }

    /// Start the periodic sweeps: idle buckets, dead tokens, stale OAuth grants.
    pub fn spawn_cleanup_tasks(&self) -> Vec<JoinHandle<()>> {
        let every = self.cleanup_interval;
        let mut handles = vec![
            rate_limit::spawn_cleanup_task(self.limiter.clone(), every),
            tokens::spawn_cleanup_task(self.tokens.clone(), every),
        ];
        if let Some(oauth) = &self.oauth {
            handles.push(oauth.clone().spawn_cleanup_task(every));
        }
        handles
    }
}

fn token_store(config: &AuthConfig) -> AuthResult<Arc<dyn TokenStore>> {
    let settings = &config.token_store;
    let store: Arc<dyn TokenStore> = match settings.kind {
        TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
        TokenStoreKind::File => {
            let path = settings
                .file_path
                .as_ref()
                .ok_or(ConfigError::MissingSetting("auth.tokenStore.filePath"))?;
            Arc::new(FileTokenStore::open(path)?)
        }
        #[cfg(feature = "redis")]
        TokenStoreKind::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or(ConfigError::MissingSetting("auth.tokenStore.redisUrl"))?;
            Arc::new(tokens::RedisTokenStore::new(url)?)
        }
        #[cfg(not(feature = "redis"))]
        TokenStoreKind::Redis => {
            return Err(ConfigError::UnsupportedBackend("redis".into()).into());
        }
    };
    Ok(store)
}
