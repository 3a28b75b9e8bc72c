use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use nexus_common::{Chain, NexusError, Result};
use nexus_crypto::evm;

use crate::adapter::{ChainAdapter, SponsoredOp, TxReceipt};

struct PendingTx {
    polls_until_final: u32,
    success: bool,
    gas_used: u64,
    gas_price: u128,
}

/// Deterministic in-memory chain for tests and the local-dev environment.
/// Tx hashes are pure functions of the submission, receipts land after a
/// configurable number of polls.
pub struct MockChainAdapter {
    chain: Chain,
    wallet_factory: String,
    confirm_after_polls: u32,
    balances: Mutex<HashMap<String, u128>>,
    txs: Mutex<HashMap<String, PendingTx>>,
    fail_next: Mutex<bool>,
    /// Stands in for the account nonce: a retry is a fresh transaction
    /// with a fresh hash.
    submissions: AtomicU64,
}

impl MockChainAdapter {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            wallet_factory: if chain.is_evm() {
                "0x9406cc6185a346906296840746125a0e44976454".to_string()
            } else {
                "NexWa11etFact0ry11111111111111111111111111".to_string()
            },
            confirm_after_polls: 0,
            balances: Mutex::new(HashMap::new()),
            txs: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
            submissions: AtomicU64::new(0),
        }
    }

    /// Delay receipts by `polls` get_receipt calls, for pending-state tests.
    pub fn confirm_after(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls;
        self
    }

    pub fn set_balance(&self, address: &str, raw: u128) {
        self.balances.lock().unwrap().insert(address.to_string(), raw);
    }

    /// Make the next submitted transaction revert.
    pub fn fail_next_submission(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    fn tx_hash(&self, payload: &[u8], nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_str().as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        if self.chain.is_evm() {
            format!("0x{}", hex::encode(digest))
        } else {
            bs58::encode(digest).into_string()
        }
    }

    fn submit(&self, payload: &[u8], gas_used: u64) -> String {
        let nonce = self.submissions.fetch_add(1, Ordering::SeqCst);
        let hash = self.tx_hash(payload, nonce);
        let success = !std::mem::take(&mut *self.fail_next.lock().unwrap());
        self.txs.lock().unwrap().insert(
            hash.clone(),
            PendingTx {
                polls_until_final: self.confirm_after_polls,
                success,
                gas_used,
                gas_price: 1_000_000_000,
            },
        );
        hash
    }
}

#[async_trait::async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn predict_wallet_address(&self, owner: &str, salt: &[u8; 32]) -> Result<String> {
        if self.chain.is_evm() {
            let init_code_hash = evm::wallet_init_code_hash(owner)?;
            evm::create2_address(&self.wallet_factory, salt, &init_code_hash)
        } else {
            let owner_bytes = bs58::decode(owner)
                .into_vec()
                .map_err(|_| NexusError::Crypto(format!("'{}' is not a base58 key", owner)))?;
            let mut hasher = Sha256::new();
            hasher.update(b"nexus-svm-wallet");
            hasher.update(self.wallet_factory.as_bytes());
            hasher.update(&owner_bytes);
            hasher.update(salt);
            let derived: [u8; 32] = hasher.finalize().into();
            Ok(bs58::encode(derived).into_string())
        }
    }

    async fn deploy_wallet(
        &self,
        owner: &str,
        salt: &[u8; 32],
        _paymaster: Option<&str>,
    ) -> Result<String> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"deploy");
        payload.extend_from_slice(owner.as_bytes());
        payload.extend_from_slice(salt);
        Ok(self.submit(&payload, 180_000))
    }

    async fn submit_sponsored_op(&self, op: &SponsoredOp, paymaster: &str) -> Result<String> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"op");
        payload.extend_from_slice(op.sender.as_bytes());
        payload.extend_from_slice(paymaster.as_bytes());
        payload.extend_from_slice(&op.data);
        Ok(self.submit(&payload, op.gas_limit.min(90_000)))
    }

    async fn get_balance(&self, address: &str) -> Result<u128> {
        Ok(self.balances.lock().unwrap().get(address).copied().unwrap_or(0))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let mut txs = self.txs.lock().unwrap();
        match txs.get_mut(tx_hash) {
            None => Ok(None),
            Some(tx) if tx.polls_until_final > 0 => {
                tx.polls_until_final -= 1;
                Ok(None)
            }
            Some(tx) => Ok(Some(TxReceipt {
                success: tx.success,
                block_number: 1_000,
                gas_used: tx.gas_used,
                gas_price: tx.gas_price,
            })),
        }
    }
}
