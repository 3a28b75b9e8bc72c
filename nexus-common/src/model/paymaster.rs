use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

/// Per-(project, chain) sponsor wallet. The private key is AEAD-encrypted
/// under the project subkey before it reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPaymaster {
    pub id: String,
    pub project_id: String,
    pub chain: Chain,
    pub address: String,
    pub encrypted_private_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymasterBalance {
    pub project_id: String,
    pub chain: Chain,
    pub address: String,
    /// Display amount in the chain's native token.
    pub balance_native: f64,
    /// Canonical raw integer in base units (wei / lamports).
    pub balance_wei: u128,
    pub balance_usd: f64,
    pub token_price_usd: f64,
    pub last_updated: DateTime<Utc>,
    pub last_tx_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    WalletDeploy,
    TransactionSponsor,
    ContractInteraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Confirmed | PaymentStatus::Failed)
    }
}

/// Append-only sponsored-payment ledger row. `amount_wei` is the canonical
/// raw integer; the display `amount` is computed from chain decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymasterPayment {
    pub id: String,
    pub project_id: String,
    pub paymaster_address: String,
    pub chain: Chain,
    pub amount: f64,
    pub amount_wei: u128,
    pub gas_for_address: String,
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_price: Option<u128>,
    pub gas_used: Option<u64>,
    pub usd_value: f64,
    pub operation_type: OperationType,
    pub user_operation_hash: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Confirmed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
