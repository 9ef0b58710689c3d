//! Configuration validation.

use super::types::{
    AuthType, RateLimitAlgorithm, TokenStoreKind, UserStoreKind, WardenConfig,
};
use crate::error::ConfigError;
use crate::jwt::keys::SigningFamily;
use crate::jwt::lifetime;
use crate::oauth::user_info_endpoint;
use crate::rate_limit::{whitelist, LimiterSettings};
use std::fmt;
use url::Url;

/// Non-fatal findings worth logging at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `leaky_bucket` is accepted but behaves as `token_bucket`.
    LeakyBucketAlias,
    /// `auth.apiKey` is set but the auth type is not `apikey`.
    UnusedStaticApiKey(AuthType),
    AuthDisabled,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::LeakyBucketAlias => {
                write!(f, "rate limit algorithm leaky_bucket behaves as token_bucket")
            }
            ConfigWarning::UnusedStaticApiKey(auth_type) => {
                write!(f, "auth.apiKey is ignored for auth type {auth_type:?}")
            }
            ConfigWarning::AuthDisabled => write!(f, "authentication is disabled"),
        }
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &WardenConfig) -> Result<Vec<ConfigWarning>, Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let auth = &config.auth;

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
        errors.push(ConfigError::InvalidLogLevel(config.logging.level.clone()));
    }

    for entry in &auth.ip_whitelist {
        if let Err(e) = whitelist::parse_entry(entry) {
            errors.push(e);
        }
    }

    if auth.rate_limit.enabled {
        if let Err(e) = LimiterSettings::from_config(&auth.rate_limit) {
            errors.push(e);
        }
        if auth.rate_limit.algorithm == RateLimitAlgorithm::LeakyBucket {
            warnings.push(ConfigWarning::LeakyBucketAlias);
        }
    }

    if !auth.enabled {
        warnings.push(ConfigWarning::AuthDisabled);
    } else {
        if auth.api_key.is_some() && auth.auth_type != AuthType::ApiKey {
            warnings.push(ConfigWarning::UnusedStaticApiKey(auth.auth_type));
        }

        if auth.user_store == UserStoreKind::File && auth.store_file.is_none() {
            errors.push(ConfigError::MissingSetting("auth.storeFile"));
        }

        match auth.token_store.kind {
            TokenStoreKind::Memory => {}
            TokenStoreKind::File => {
                if auth.token_store.file_path.is_none() {
                    errors.push(ConfigError::MissingSetting("auth.tokenStore.filePath"));
                }
            }
            TokenStoreKind::Redis => {
                if !cfg!(feature = "redis") {
                    errors.push(ConfigError::UnsupportedBackend("redis".into()));
                } else if auth.token_store.redis_url.is_none() {
                    errors.push(ConfigError::MissingSetting("auth.tokenStore.redisUrl"));
                }
            }
        }

        match auth.auth_type {
            AuthType::Jwt => validate_jwt(config, &mut errors),
            AuthType::OAuth => {
                if auth.oauth.providers.is_empty() {
                    errors.push(ConfigError::MissingSetting("auth.oauth.providers"));
                }
            }
            AuthType::ApiKey | AuthType::Basic => {}
        }
    }

    for (name, provider) in &auth.oauth.providers {
        for (field, value) in [
            ("authUrl", &provider.auth_url),
            ("tokenUrl", &provider.token_url),
            ("redirectUrl", &provider.redirect_url),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(ConfigError::InvalidUrl {
                    field: format!("auth.oauth.providers.{name}.{field}"),
                    reason: e.to_string(),
                });
            }
        }
        if let Err(e) = user_info_endpoint(name, provider) {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}

fn validate_jwt(config: &WardenConfig, errors: &mut Vec<ConfigError>) {
    let jwt = &config.auth.jwt;

    match SigningFamily::from_name(&jwt.algorithm) {
        Ok(SigningFamily::Hmac(_)) => match &jwt.secret {
            None => errors.push(ConfigError::MissingSetting("auth.jwt.secret")),
            Some(secret) if secret.expose().len() < 32 => {
                errors.push(ConfigError::InvalidJwtSecret)
            }
            Some(_) => {}
        },
        Ok(SigningFamily::Rsa(_)) => {
            if jwt.private_key_path.is_none() {
                errors.push(ConfigError::MissingSetting("auth.jwt.privateKeyPath"));
            }
            if jwt.public_key_path.is_none() {
                errors.push(ConfigError::MissingSetting("auth.jwt.publicKeyPath"));
            }
        }
        Err(e) => errors.push(e),
    }

    if let Err(e) = lifetime("auth.jwt.expirationMinutes", jwt.expiration_minutes) {
        errors.push(e);
    }
    if let Err(e) = lifetime(
        "auth.jwt.refreshExpirationMinutes",
        jwt.refresh_expiration_minutes.max(1),
    ) {
        errors.push(e);
    }
}
