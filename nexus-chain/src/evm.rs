use std::time::Duration;

use serde_json::{json, Value};

use nexus_common::{Chain, NexusError, Result};
use nexus_crypto::evm;

use crate::adapter::{with_retry, ChainAdapter, SponsoredOp, TxReceipt};
use crate::registry::ChainConfig;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// ERC-4337-style adapter: wallets come out of the registry's CREATE2
/// factory, submissions go through the EntryPoint's bundler RPC.
pub struct EvmAdapter {
    cfg: ChainConfig,
    http: reqwest::Client,
}

impl EvmAdapter {
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
            .map_err(|e| NexusError::Upstream(format!("{} rpc: {}", self.cfg.name, e)))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| NexusError::Upstream(format!("{} rpc decode: {}", self.cfg.name, e)))?;
        if let Some(err) = value.get("error") {
            if !err.is_null() {
                return Err(NexusError::Upstream(format!("{} rpc {}: {}", self.cfg.name, method, err)));
            }
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn block_number(&self) -> Result<u64> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        parse_hex_u64(result.as_str().unwrap_or_default())
    }

    /// `initCode` for the factory call: factory address followed by the
    /// ABI-encoded `createWallet(owner, salt)` call.
    fn wallet_init_code(&self, owner: &str, salt: &[u8; 32]) -> Result<Vec<u8>> {
        let mut code = Vec::with_capacity(20 + 4 + 64);
        code.extend_from_slice(&evm::parse_address(&self.cfg.wallet_factory)?);
        code.extend_from_slice(&evm::selector("createWallet(address,bytes32)"));
        code.extend_from_slice(&evm::abi_address(owner)?);
        code.extend_from_slice(salt);
        Ok(code)
    }

    fn user_op(
        &self,
        sender: &str,
        init_code: &[u8],
        call_data: &[u8],
        gas_limit: u64,
        paymaster: Option<&str>,
    ) -> Value {
        json!({
            "sender": sender,
            "nonce": "0x0",
            "initCode": format!("0x{}", hex::encode(init_code)),
            "callData": format!("0x{}", hex::encode(call_data)),
            "callGasLimit": format!("0x{:x}", gas_limit),
            "verificationGasLimit": "0x186a0",
            "preVerificationGas": "0xafc8",
            "maxFeePerGas": "0x3b9aca00",
            "maxPriorityFeePerGas": "0x3b9aca00",
            "paymasterAndData": paymaster
                .map(|p| p.to_string())
                .unwrap_or_else(|| "0x".to_string()),
            "signature": "0x",
        })
    }

    async fn send_user_op(&self, op: Value) -> Result<String> {
        let entry_point = self.cfg.entry_point.as_str();
        let result = with_retry("eth_sendUserOperation", || {
            self.rpc("eth_sendUserOperation", json!([op.clone(), entry_point]))
        })
        .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| NexusError::Upstream(format!("{}: bundler returned no hash", self.cfg.name)))
    }
}

#[async_trait::async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> Chain {
        self.cfg.chain
    }

    /// Mirrors the factory's `getWalletAddress(owner, salt)` view: CREATE2
    /// over the registry factory and the owner-parameterized init code.
    async fn predict_wallet_address(&self, owner: &str, salt: &[u8; 32]) -> Result<String> {
        let init_code_hash = evm::wallet_init_code_hash(owner)?;
        evm::create2_address(&self.cfg.wallet_factory, salt, &init_code_hash)
    }

    async fn deploy_wallet(
        &self,
        owner: &str,
        salt: &[u8; 32],
        paymaster: Option<&str>,
    ) -> Result<String> {
        let sender = self.predict_wallet_address(owner, salt).await?;
        let init_code = self.wallet_init_code(owner, salt)?;
        let op = self.user_op(&sender, &init_code, &[], 500_000, paymaster);
        self.send_user_op(op).await
    }

    async fn submit_sponsored_op(&self, op: &SponsoredOp, paymaster: &str) -> Result<String> {
        let user_op = self.user_op(&op.sender, &[], &op.data, op.gas_limit, Some(paymaster));
        self.send_user_op(user_op).await
    }

    async fn get_balance(&self, address: &str) -> Result<u128> {
        let result = with_retry("eth_getBalance", || {
            self.rpc("eth_getBalance", json!([address, "latest"]))
        })
        .await?;
        parse_hex_u128(result.as_str().unwrap_or_default())
    }

    /// A receipt only counts once the registry's confirmation depth has
    /// passed; before that the transaction is still pending to us.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let receipt = self.rpc("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if receipt.is_null() {
            return Ok(None);
        }

        let block_number = parse_hex_u64(receipt["blockNumber"].as_str().unwrap_or_default())?;
        let head = self.block_number().await?;
        if head < block_number + self.cfg.confirmations.saturating_sub(1) {
            return Ok(None);
        }

        Ok(Some(TxReceipt {
            success: receipt["status"].as_str() == Some("0x1"),
            block_number,
            gas_used: parse_hex_u64(receipt["gasUsed"].as_str().unwrap_or_default())?,
            gas_price: parse_hex_u128(
                receipt["effectiveGasPrice"].as_str().unwrap_or("0x0"),
            )?,
        }))
    }
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| NexusError::Upstream(format!("malformed hex quantity '{}'", s)))
}

fn parse_hex_u128(s: &str) -> Result<u128> {
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| NexusError::Upstream(format!("malformed hex quantity '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChainRegistry;

    fn adapter() -> EvmAdapter {
        let registry = ChainRegistry::from_env();
        EvmAdapter::new(registry.get(Chain::Ethereum).unwrap().clone())
    }

    #[tokio::test]
    async fn prediction_is_pure() {
        let a = adapter();
        let salt = [3u8; 32];
        let owner = "0x000000000000000000000000000000000000dead";
        let first = a.predict_wallet_address(owner, &salt).await.unwrap();
        let second = a.predict_wallet_address(owner, &salt).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("0x"));
    }

    #[test]
    fn init_code_embeds_factory_selector_and_args() {
        let a = adapter();
        let salt = [7u8; 32];
        let code = a.wallet_init_code("0x000000000000000000000000000000000000dead", &salt).unwrap();
        assert_eq!(code.len(), 20 + 4 + 32 + 32);
        // factory address leads
        assert_eq!(&code[..20], &evm::parse_address(&a.cfg.wallet_factory).unwrap());
        // salt trails
        assert_eq!(&code[code.len() - 32..], &salt);
    }

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(parse_hex_u64("0x2a").unwrap(), 42);
        assert_eq!(parse_hex_u128("0xde0b6b3a7640000").unwrap(), 1_000_000_000_000_000_000);
        assert!(parse_hex_u64("zz").is_err());
    }
}
