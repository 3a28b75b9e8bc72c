use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use nexus_common::model::OperationType;
use nexus_common::{Chain, NexusError, Result};

/// Receipt fields the control plane indexes; settlement semantics stay with
/// the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
}

impl TxReceipt {
    pub fn cost_wei(&self) -> u128 {
        self.gas_used as u128 * self.gas_price
    }
}

/// A gas-sponsored operation submitted on behalf of a project user.
#[derive(Debug, Clone)]
pub struct SponsoredOp {
    pub sender: String,
    pub target: String,
    /// ABI calldata (EVM) or instruction data (Solana).
    pub data: Vec<u8>,
    pub value_wei: u128,
    pub gas_limit: u64,
    pub operation_type: OperationType,
}

/// Uniform surface over EVM chains and Solana. One implementation per
/// chain, selected through the registry.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Counterfactual wallet address for (owner, salt); pure, no gas.
    async fn predict_wallet_address(&self, owner: &str, salt: &[u8; 32]) -> Result<String>;

    /// Submits factory `createWallet(owner, salt)`, optionally sponsored.
    /// Returns the tx hash / signature to poll.
    async fn deploy_wallet(
        &self,
        owner: &str,
        salt: &[u8; 32],
        paymaster: Option<&str>,
    ) -> Result<String>;

    async fn submit_sponsored_op(&self, op: &SponsoredOp, paymaster: &str) -> Result<String>;

    /// Balance in raw base units (wei / lamports).
    async fn get_balance(&self, address: &str) -> Result<u128>;

    /// `None` while the transaction is still in flight.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;
}

/// The per-chain adapter singletons a running node holds.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: HashMap<Chain, Arc<dyn ChainAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, chain: Chain) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or_else(|| NexusError::Internal(format!("no adapter bound for {}", chain)))
    }
}

/// Bounded retry for transient upstream failures: max 3 attempts with
/// exponential backoff, then the error surfaces with a retry hint.
pub(crate) async fn with_retry<T, F, Fut>(label: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(NexusError::Upstream(msg)) if attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let backoff = Duration::from_millis(200u64 << attempt);
                tracing::warn!(target: "chain", "{} failed (attempt {}): {}; retrying", label, attempt, msg);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NexusError::Upstream("rpc down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(NexusError::Upstream("blip".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn non_upstream_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NexusError::validation("BAD", "no")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
