use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

pub fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Random hex token of `bytes` entropy bytes (verification, reset tokens).
pub fn random_hex_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Constant-time string comparison for presented secrets.
pub fn secrets_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_length_is_hex_of_bytes() {
        assert_eq!(random_hex_token(32).len(), 64);
        assert_eq!(random_hex_token(16).len(), 32);
    }

    #[test]
    fn tokens_are_random() {
        assert_ne!(random_hex_token(32), random_hex_token(32));
    }

    #[test]
    fn secrets_compare() {
        assert!(secrets_equal("npay_x", "npay_x"));
        assert!(!secrets_equal("npay_x", "npay_y"));
        assert!(!secrets_equal("npay_x", "npay_xx"));
    }
}
