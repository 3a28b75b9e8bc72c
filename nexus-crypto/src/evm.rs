use sha3::{Digest, Keccak256};

use nexus_common::{NexusError, Result};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Address of an uncompressed secp256k1 public key: Keccak-256 over the
/// 64 coordinate bytes, last 20 bytes, 0x-hex.
pub fn pubkey_to_address(uncompressed: &[u8]) -> Result<String> {
    if uncompressed.len() != 65 || uncompressed[0] != 0x04 {
        return Err(NexusError::Crypto("expected 65-byte uncompressed secp256k1 key".into()));
    }
    let hash = keccak256(&uncompressed[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

pub fn parse_address(addr: &str) -> Result<[u8; 20]> {
    let stripped = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(stripped)
        .map_err(|_| NexusError::Crypto(format!("'{}' is not a hex address", addr)))?;
    bytes
        .try_into()
        .map_err(|_| NexusError::Crypto(format!("'{}' is not 20 bytes", addr)))
}

/// CREATE2: `keccak(0xff ‖ deployer ‖ salt ‖ initCodeHash)[12..]`.
/// Pure function of its inputs, so counterfactual addresses are stable
/// before any transaction lands.
pub fn create2_address(deployer: &str, salt: &[u8; 32], init_code_hash: &[u8; 32]) -> Result<String> {
    let deployer = parse_address(deployer)?;
    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(&deployer);
    preimage.extend_from_slice(salt);
    preimage.extend_from_slice(init_code_hash);
    let hash = keccak256(&preimage);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

/// Init-code hash of the minimal wallet proxy parameterized by its owner.
/// Factories bake the owner into the constructor arguments, so the hash
/// (and therefore the CREATE2 address) is owner-specific.
pub fn wallet_init_code_hash(owner: &str) -> Result<[u8; 32]> {
    let owner = parse_address(owner)?;
    let mut preimage = Vec::with_capacity(11 + 20);
    preimage.extend_from_slice(b"nexus-wallet");
    preimage.extend_from_slice(&owner);
    Ok(keccak256(&preimage))
}

/// Init-code hash of the paymaster proxy; parameterized by the sponsor EOA.
pub fn paymaster_init_code_hash(sponsor: &str) -> Result<[u8; 32]> {
    let sponsor = parse_address(sponsor)?;
    let mut preimage = Vec::with_capacity(14 + 20);
    preimage.extend_from_slice(b"nexus-paymaster");
    preimage.extend_from_slice(&sponsor);
    Ok(keccak256(&preimage))
}

/// First four bytes of `keccak(signature)`, the ABI function selector.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encodes an address argument (left-padded to 32 bytes).
pub fn abi_address(addr: &str) -> Result<[u8; 32]> {
    let bytes = parse_address(addr)?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}
