//! Signing algorithm selection and key material.

use crate::config::JwtConfig;
use crate::error::ConfigError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Algorithm families this crate can sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningFamily {
    Hmac(Algorithm),
    Rsa(Algorithm),
}

impl SigningFamily {
    /// Parse an algorithm name. ECDSA, RSA-PSS and EdDSA are rejected.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let unsupported = || ConfigError::UnsupportedAlgorithm(name.to_string());
        let algorithm = Algorithm::from_str(&name.trim().to_ascii_uppercase())
            .map_err(|_| unsupported())?;

        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(SigningFamily::Hmac(algorithm))
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                Ok(SigningFamily::Rsa(algorithm))
            }
            _ => Err(unsupported()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match *self {
            SigningFamily::Hmac(alg) | SigningFamily::Rsa(alg) => alg,
        }
    }
}

/// Encoding and decoding keys for one algorithm.
#[derive(Clone)]
pub struct SigningKeys {
    pub(crate) algorithm: Algorithm,
    pub(crate) encoding: EncodingKey,
    pub(crate) decoding: DecodingKey,
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Load key material for the configured algorithm.
    pub fn from_config(config: &JwtConfig) -> Result<Self, ConfigError> {
        match SigningFamily::from_name(&config.algorithm)? {
            SigningFamily::Hmac(algorithm) => {
                let secret = config
                    .secret
                    .as_ref()
                    .ok_or(ConfigError::MissingSetting("auth.jwt.secret"))?;
                let bytes = secret.expose().as_bytes();
                if bytes.len() < MIN_SECRET_LEN {
                    return Err(ConfigError::InvalidJwtSecret);
                }
                Ok(Self {
                    algorithm,
                    encoding: EncodingKey::from_secret(bytes),
                    decoding: DecodingKey::from_secret(bytes),
                })
            }
            SigningFamily::Rsa(algorithm) => {
                let private_path = config
                    .private_key_path
                    .as_deref()
                    .ok_or(ConfigError::MissingSetting("auth.jwt.privateKeyPath"))?;
                let public_path = config
                    .public_key_path
                    .as_deref()
                    .ok_or(ConfigError::MissingSetting("auth.jwt.publicKeyPath"))?;

                let encoding = EncodingKey::from_rsa_pem(&read_pem(private_path)?)
                    .map_err(|e| invalid_key(private_path, e))?;
                let decoding = DecodingKey::from_rsa_pem(&read_pem(public_path)?)
                    .map_err(|e| invalid_key(public_path, e))?;

                Ok(Self {
                    algorithm,
                    encoding,
                    decoding,
                })
            }
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| invalid_key(path, e))
}

fn invalid_key(path: &Path, reason: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidKeyMaterial {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common_secret::SecretString;

    #[test]
    fn test_family_parsing() {
        assert_eq!(
            SigningFamily::from_name("HS256").unwrap(),
            SigningFamily::Hmac(Algorithm::HS256)
        );
        assert_eq!(
            SigningFamily::from_name("rs512").unwrap(),
            SigningFamily::Rsa(Algorithm::RS512)
        );
        for name in ["ES256", "ES384", "PS256", "EdDSA", "none", ""] {
            assert!(
                matches!(
                    SigningFamily::from_name(name),
                    Err(ConfigError::UnsupportedAlgorithm(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_hmac_secret_rules() {
        let mut config = JwtConfig::default();
        assert!(matches!(
            SigningKeys::from_config(&config),
            Err(ConfigError::MissingSetting(_))
        ));

        config.secret = Some(SecretString::from("too-short"));
        assert!(matches!(
            SigningKeys::from_config(&config),
            Err(ConfigError::InvalidJwtSecret)
        ));

        config.secret = Some(SecretString::from("k".repeat(MIN_SECRET_LEN)));
        assert_eq!(
            SigningKeys::from_config(&config).unwrap().algorithm(),
            Algorithm::HS256
        );
    }

    #[test]
    fn test_rsa_missing_file() {
        let config = JwtConfig {
            algorithm: "RS256".into(),
            private_key_path: Some("/nonexistent/private.pem".into()),
            public_key_path: Some("/nonexistent/public.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            SigningKeys::from_config(&config),
            Err(ConfigError::InvalidKeyMaterial { .. })
        ));
    }
}
