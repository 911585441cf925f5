//! Password policy, hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::config::PasswordConfig;
use crate::errors::Error;

/// Characters accepted as the "special character" of a password.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Create Argon2 instance with these parameters.
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, params: Argon2Params) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = params.to_argon2()?.hash_password(password.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash password: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Verification uses the parameters embedded in the hash, so raising the configured cost does
/// not invalidate existing accounts.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse hash: {e}"),
    })?;

    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
}

/// Check a candidate password against the configured policy.
pub fn check_policy(password: &str, policy: &PasswordConfig) -> Result<(), Error> {
    let weak = |message: String| Err(Error::WeakPassword { message });
    let length = password.chars().count();

    if length < policy.min_length {
        return weak(format!("must be at least {} characters", policy.min_length));
    }
    if length > policy.max_length {
        return weak(format!("must be no more than {} characters", policy.max_length));
    }
    if policy.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
        return weak("must contain at least one uppercase letter".to_string());
    }
    if policy.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
        return weak("must contain at least one lowercase letter".to_string());
    }
    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return weak("must contain at least one number".to_string());
    }
    if policy.require_special && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        return weak(format!("must contain at least one special character ({SPECIAL_CHARACTERS})"));
    }
    Ok(())
}

/// Identities are 3-64 characters of letters, digits, `_`, `.`, `-` or `@`.
pub fn check_identity(identity: &str) -> Result<(), Error> {
    let length = identity.chars().count();
    if !(3..=64).contains(&length) {
        return Err(Error::BadRequest {
            message: "Identity must be between 3 and 64 characters".to_string(),
        });
    }
    if !identity.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '@')) {
        return Err(Error::BadRequest {
            message: "Identity may only contain letters, numbers, '_', '.', '-' and '@'".to_string(),
        });
    }
    Ok(())
}
