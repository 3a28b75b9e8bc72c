use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use nexus_common::{Chain, NexusError, Result};

use crate::adapter::{with_retry, ChainAdapter, SponsoredOp, TxReceipt};
use crate::registry::ChainConfig;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Base fee charged per Solana signature, in lamports.
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Adapter over the project's deployed wallet and paymaster programs.
pub struct SolanaAdapter {
    cfg: ChainConfig,
    http: reqwest::Client,
}

impl SolanaAdapter {
    pub fn new(cfg: ChainConfig) -> Self {
        Self { cfg, http: reqwest::Client::new() }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .http
            .post(&self.cfg.rpc_url)
            .timeout(RPC_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| NexusError::Upstream(format!("solana rpc: {}", e)))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| NexusError::Upstream(format!("solana rpc decode: {}", e)))?;
        if let Some(err) = value.get("error") {
            if !err.is_null() {
                return Err(NexusError::Upstream(format!("solana rpc {}: {}", method, err)));
            }
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Raw instruction payload for the wallet program: discriminator,
    /// owner key, salt.
    fn create_wallet_data(&self, owner: &str, salt: &[u8; 32]) -> Result<Vec<u8>> {
        let owner_bytes = bs58::decode(owner)
            .into_vec()
            .map_err(|_| NexusError::Crypto(format!("'{}' is not a base58 key", owner)))?;
        let mut data = Vec::with_capacity(8 + owner_bytes.len() + 32);
        data.extend_from_slice(b"crwallet");
        data.extend_from_slice(&owner_bytes);
        data.extend_from_slice(salt);
        Ok(data)
    }

    async fn send_transaction(&self, payload: Vec<u8>) -> Result<String> {
        let encoded = BASE64.encode(payload);
        let result = with_retry("sendTransaction", || {
            self.rpc(
                "sendTransaction",
                json!([encoded.as_str(), { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
        })
        .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| NexusError::Upstream("solana returned no signature".into()))
    }
}

#[async_trait::async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain(&self) -> Chain {
        self.cfg.chain
    }

    /// Program-derived wallet account for (owner, salt) under the registry's
    /// wallet program; stable across calls like its CREATE2 counterpart.
    async fn predict_wallet_address(&self, owner: &str, salt: &[u8; 32]) -> Result<String> {
        let owner_bytes = bs58::decode(owner)
            .into_vec()
            .map_err(|_| NexusError::Crypto(format!("'{}' is not a base58 key", owner)))?;
        let mut hasher = Sha256::new();
        hasher.update(b"nexus-svm-wallet");
        hasher.update(self.cfg.wallet_factory.as_bytes());
        hasher.update(&owner_bytes);
        hasher.update(salt);
        let derived: [u8; 32] = hasher.finalize().into();
        Ok(bs58::encode(derived).into_string())
    }

    async fn deploy_wallet(
        &self,
        owner: &str,
        salt: &[u8; 32],
        _paymaster: Option<&str>,
    ) -> Result<String> {
        // The paymaster program is the fee payer on Solana; the instruction
        // itself is identical either way.
        let data = self.create_wallet_data(owner, salt)?;
        self.send_transaction(data).await
    }

    async fn submit_sponsored_op(&self, op: &SponsoredOp, _paymaster: &str) -> Result<String> {
        self.send_transaction(op.data.clone()).await
    }

    async fn get_balance(&self, address: &str) -> Result<u128> {
        let result = with_retry("getBalance", || self.rpc("getBalance", json!([address]))).await?;
        result["value"]
            .as_u64()
            .map(|v| v as u128)
            .ok_or_else(|| NexusError::Upstream("getBalance returned no value".into()))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let result = self
            .rpc(
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await?;
        let status = &result["value"][0];
        if status.is_null() {
            return Ok(None);
        }
        let commitment = status["confirmationStatus"].as_str().unwrap_or_default();
        if commitment != "confirmed" && commitment != "finalized" {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            success: status["err"].is_null(),
            block_number: status["slot"].as_u64().unwrap_or_default(),
            gas_used: LAMPORTS_PER_SIGNATURE,
            gas_price: 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChainRegistry;

    fn adapter() -> SolanaAdapter {
        let registry = ChainRegistry::from_env();
        SolanaAdapter::new(registry.get(Chain::Solana).unwrap().clone())
    }

    #[tokio::test]
    async fn prediction_is_pure_and_base58() {
        let a = adapter();
        let owner = bs58::encode([5u8; 32]).into_string();
        let salt = [9u8; 32];
        let first = a.predict_wallet_address(&owner, &salt).await.unwrap();
        let second = a.predict_wallet_address(&owner, &salt).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(bs58::decode(&first).into_vec().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn prediction_rejects_non_base58_owner() {
        let a = adapter();
        assert!(a.predict_wallet_address("0xnot-base58!", &[0u8; 32]).await.is_err());
    }

    #[test]
    fn instruction_payload_shape() {
        let a = adapter();
        let owner = bs58::encode([5u8; 32]).into_string();
        let data = a.create_wallet_data(&owner, &[1u8; 32]).unwrap();
        assert_eq!(&data[..8], b"crwallet");
        assert_eq!(data.len(), 8 + 32 + 32);
    }
}
