use ed25519_dalek::SigningKey as Ed25519SigningKey;
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey as Secp256k1SigningKey;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use nexus_common::{Chain, NexusError, Result};

use crate::evm;

type HmacSha256 = Hmac<Sha256>;

/// A deterministically derived keypair: raw secret bytes plus the
/// chain-appropriate public address.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    pub secret: [u8; 32],
    #[zeroize(skip)]
    pub address: String,
}

/// Service-held master derivation secret. Every owner EOA, Solana keypair,
/// and paymaster keypair is a pure function of this secret and the
/// (projectId, …) inputs, which is what makes wallet creation idempotent
/// and keyless on the read path.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    secret: [u8; 32],
}

impl MasterSecret {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    pub fn from_hex(hex_secret: &str) -> Result<Self> {
        let bytes = hex::decode(hex_secret)
            .map_err(|_| NexusError::Crypto("master secret is not valid hex".into()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NexusError::Crypto("master secret must be 32 bytes".into()))?;
        Ok(Self::new(secret))
    }

    /// HMAC-SHA256 over `|`-joined domain parts, keyed by the master secret.
    fn seed(&self, parts: &[&str]) -> Result<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| NexusError::Crypto("invalid master secret".into()))?;
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                mac.update(b"|");
            }
            mac.update(part.as_bytes());
        }
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    /// Wallet-owner EOA for the EVM chains of a project.
    pub fn evm_owner(&self, project_id: &str, social_id: &str, social_type: &str) -> Result<DerivedKey> {
        let mut seed = self.seed(&["owner", project_id, social_id, social_type])?;
        let key = secp256k1_from_seed(&seed);
        seed.zeroize();
        key
    }

    /// Ed25519 keypair backing the user's Solana program-derived wallet.
    pub fn solana_wallet(&self, project_id: &str, social_id: &str, social_type: &str) -> Result<DerivedKey> {
        let mut seed = self.seed(&["svm", project_id, social_id, social_type])?;
        let key = ed25519_from_seed(&seed);
        seed.zeroize();
        Ok(key)
    }

    /// Per-(project, chain) paymaster keypair.
    pub fn paymaster(&self, project_id: &str, chain: Chain) -> Result<DerivedKey> {
        let mut seed = self.seed(&["pm", project_id, chain.as_str()])?;
        let key = if chain.is_evm() {
            secp256k1_from_seed(&seed)
        } else {
            Ok(ed25519_from_seed(&seed))
        };
        seed.zeroize();
        key
    }
}

fn secp256k1_from_seed(seed: &[u8; 32]) -> Result<DerivedKey> {
    let signing = Secp256k1SigningKey::from_slice(seed)
        .map_err(|_| NexusError::Crypto("derived seed is not a valid secp256k1 scalar".into()))?;
    let point = signing.verifying_key().to_encoded_point(false);
    let address = evm::pubkey_to_address(point.as_bytes())?;
    Ok(DerivedKey { secret: *seed, address })
}

fn ed25519_from_seed(seed: &[u8; 32]) -> DerivedKey {
    let signing = Ed25519SigningKey::from_bytes(seed);
    let address = bs58::encode(signing.verifying_key().to_bytes()).into_string();
    DerivedKey { secret: *seed, address }
}

/// Keyless CREATE2 salt for a user wallet: `H("salt"|projectId|socialId|socialType)`.
pub fn wallet_salt(project_id: &str, social_id: &str, social_type: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"salt");
    hasher.update(b"|");
    hasher.update(project_id.as_bytes());
    hasher.update(b"|");
    hasher.update(social_id.as_bytes());
    hasher.update(b"|");
    hasher.update(social_type.as_bytes());
    hasher.finalize().into()
}

/// CREATE2 salt for a project's paymaster proxy: `H(projectId|chain)`.
pub fn paymaster_salt(project_id: &str, chain: Chain) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"|");
    hasher.update(chain.as_str().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> MasterSecret {
        MasterSecret::new([42u8; 32])
    }

    #[test]
    fn evm_owner_is_deterministic() {
        let a = master().evm_owner("proj_1", "bob@x.io", "email").unwrap();
        let b = master().evm_owner("proj_1", "bob@x.io", "email").unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.secret, b.secret);
        assert!(a.address.starts_with("0x"));
        assert_eq!(a.address.len(), 42);
    }

    #[test]
    fn inputs_are_domain_separated() {
        let m = master();
        let base = m.evm_owner("proj_1", "bob@x.io", "email").unwrap();
        assert_ne!(base.address, m.evm_owner("proj_2", "bob@x.io", "email").unwrap().address);
        assert_ne!(base.address, m.evm_owner("proj_1", "bob@x.io", "phone").unwrap().address);
        assert_ne!(base.address, m.evm_owner("proj_1", "alice@x.io", "email").unwrap().address);
    }

    #[test]
    fn different_master_secret_different_keys() {
        let a = MasterSecret::new([1u8; 32]).evm_owner("proj_1", "bob@x.io", "email").unwrap();
        let b = MasterSecret::new([2u8; 32]).evm_owner("proj_1", "bob@x.io", "email").unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn solana_wallet_is_base58() {
        let key = master().solana_wallet("proj_1", "bob@x.io", "email").unwrap();
        assert!(bs58::decode(&key.address).into_vec().unwrap().len() == 32);
    }

    #[test]
    fn paymaster_keys_differ_per_chain() {
        let m = master();
        let eth = m.paymaster("proj_1", Chain::Ethereum).unwrap();
        let arb = m.paymaster("proj_1", Chain::Arbitrum).unwrap();
        let sol = m.paymaster("proj_1", Chain::Solana).unwrap();
        assert_ne!(eth.address, arb.address);
        assert!(eth.address.starts_with("0x"));
        assert!(!sol.address.starts_with("0x"));
    }

    #[test]
    fn salts_are_stable() {
        assert_eq!(
            wallet_salt("proj_1", "bob@x.io", "email"),
            wallet_salt("proj_1", "bob@x.io", "email")
        );
        assert_ne!(
            paymaster_salt("proj_1", Chain::Ethereum),
            paymaster_salt("proj_1", Chain::Arbitrum)
        );
    }

    #[test]
    fn from_hex_validates() {
        assert!(MasterSecret::from_hex(&hex::encode([9u8; 32])).is_ok());
        assert!(MasterSecret::from_hex("abcd").is_err());
    }
}
