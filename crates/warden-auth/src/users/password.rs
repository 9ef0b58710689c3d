//! Argon2id password hashing.

use crate::error::{AuthError, AuthResult};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;

/// Hash verified when the username is unknown, so both paths cost the same.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("warden-dummy-password").unwrap_or_default());

/// Hash a password into a PHC string with a random salt.
pub fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("failed to hash password: {e}")))
}

/// Verify a password against a PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Spend one verification on the dummy hash and report failure.
pub fn verify_dummy(password: &str) -> bool {
    verify_password(password, &DUMMY_HASH);
    false
}

/// Whether a stored value is a PHC hash rather than a legacy plaintext password.
pub fn is_phc_hash(value: &str) -> bool {
    value.starts_with("$argon2")
}
