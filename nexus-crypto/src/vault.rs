use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use nexus_common::security::generate_nonce;
use nexus_common::{NexusError, Result};

type HmacSha256 = Hmac<Sha256>;

const BLOB_VERSION: u8 = 1;

/// Envelope stored at rest: version + nonce + ciphertext, bincode-encoded.
#[derive(Debug, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct VaultBlob {
    version: u8,
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

/// AEAD vault for at-rest secrets (API-key plaintexts, paymaster private
/// keys). Each project gets its own subkey derived from the service
/// encryption key, so a blob sealed for one project cannot be opened under
/// another's context.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyVault {
    master_key: [u8; 32],
}

impl KeyVault {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|_| NexusError::Crypto("encryption key is not valid hex".into()))?;
        let master_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NexusError::Crypto("encryption key must be 32 bytes".into()))?;
        Ok(Self::new(master_key))
    }

    fn subkey(&self, context: &str) -> Result<[u8; 32]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.master_key)
            .map_err(|_| NexusError::Crypto("invalid vault master key".into()))?;
        mac.update(b"vault");
        mac.update(context.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    pub fn encrypt(&self, context: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.subkey(context)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
        let nonce = generate_nonce();
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| NexusError::Crypto("encryption failed".into()))?;
        key.zeroize();

        let blob = VaultBlob { version: BLOB_VERSION, nonce, ciphertext };
        bincode::serialize(&blob).map_err(|e| NexusError::Crypto(e.to_string()))
    }

    pub fn decrypt(&self, context: &str, encoded: &[u8]) -> Result<Vec<u8>> {
        let blob: VaultBlob = bincode::deserialize(encoded)
            .map_err(|_| NexusError::Crypto("vault blob is malformed".into()))?;
        if blob.version != BLOB_VERSION {
            return Err(NexusError::Crypto(format!("unknown vault version {}", blob.version)));
        }
        let mut key = self.subkey(context)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(&blob.nonce), blob.ciphertext.as_ref())
            .map_err(|_| NexusError::Crypto("decryption failed".into()));
        key.zeroize();
        plaintext
    }

    /// Keyed MAC over arbitrary data under a named context, hex-encoded.
    /// Backs the plaintext-key lookup index: the tag identifies a key
    /// without storing anything recoverable.
    pub fn mac_hex(&self, context: &str, data: &[u8]) -> Result<String> {
        let mut key = self.subkey(context)?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
            .map_err(|_| NexusError::Crypto("invalid vault master key".into()))?;
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        key.zeroize();
        Ok(hex::encode(digest))
    }

    pub fn encrypt_str(&self, context: &str, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(context, plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, context: &str, encoded: &[u8]) -> Result<String> {
        let bytes = self.decrypt(context, encoded)?;
        String::from_utf8(bytes).map_err(|_| NexusError::Crypto("decrypted value is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> KeyVault {
        KeyVault::new([7u8; 32])
    }

    #[test]
    fn round_trip_under_same_context() {
        let v = vault();
        let blob = v.encrypt_str("proj_abc", "npay_proj_abc_11112222_dev_ffff").unwrap();
        let back = v.decrypt_str("proj_abc", &blob).unwrap();
        assert_eq!(back, "npay_proj_abc_11112222_dev_ffff");
    }

    #[test]
    fn wrong_project_context_cannot_open() {
        let v = vault();
        let blob = v.encrypt_str("proj_abc", "secret").unwrap();
        assert!(v.decrypt_str("proj_other", &blob).is_err());
    }

    #[test]
    fn tampered_blob_fails() {
        let v = vault();
        let mut blob = v.encrypt_str("proj_abc", "secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(v.decrypt_str("proj_abc", &blob).is_err());
    }

    #[test]
    fn mac_is_stable_and_context_bound() {
        let v = vault();
        let a = v.mac_hex("key-index", b"npay_proj_x").unwrap();
        let b = v.mac_hex("key-index", b"npay_proj_x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, v.mac_hex("other", b"npay_proj_x").unwrap());
        assert_ne!(a, v.mac_hex("key-index", b"npay_proj_y").unwrap());
    }

    #[test]
    fn from_hex_validates_length() {
        assert!(KeyVault::from_hex(&hex::encode([1u8; 32])).is_ok());
        assert!(KeyVault::from_hex("deadbeef").is_err());
        assert!(KeyVault::from_hex("zz").is_err());
    }
}
