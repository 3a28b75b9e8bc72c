use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use nexus_common::{NexusError, Result};

/// Argon2id hash in PHC string form, ready for at-rest storage.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| NexusError::Crypto(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Verifies a candidate against a stored PHC string. A malformed stored
/// hash verifies as false rather than erroring; login failure paths must
/// stay uniform.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
