use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Dropped,
}

/// Append-only per-project transaction journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: String,
    pub project_id: String,
    pub transaction_type: String,
    pub chain: Chain,
    pub wallet_address: String,
    pub user_identifier: String,
    pub social_type: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_used: Option<u64>,
    pub gas_price: Option<u128>,
    pub gas_cost_wei: Option<u128>,
    pub gas_cost_usd: f64,
    pub currency: String,
    pub paymaster_paid: bool,
    pub paymaster_address: Option<String>,
    pub status: TransactionStatus,
    pub error_message: Option<String>,
    /// Free-form JSON payloads, stored as text.
    pub details: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Rolling per-(project, user) counters, updated on every confirmed
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivity {
    pub project_id: String,
    pub user_identifier: String,
    pub wallets_created: u64,
    pub transactions_sent: u64,
    pub total_gas_spent_usd: f64,
    pub paymaster_transactions: u64,
    pub user_paid_transactions: u64,
    pub chains_used: BTreeSet<Chain>,
    pub tx_types_used: BTreeSet<String>,
    pub preferred_chain: Option<Chain>,
    pub first_active: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Consecutive-day activity streak ending at `last_active`.
    pub streak_days: u32,
    /// Bounded [0, 1000].
    pub engagement_score: u32,
}

impl UserActivity {
    pub fn new(project_id: &str, user_identifier: &str, now: DateTime<Utc>) -> Self {
        Self {
            project_id: project_id.to_string(),
            user_identifier: user_identifier.to_string(),
            wallets_created: 0,
            transactions_sent: 0,
            total_gas_spent_usd: 0.0,
            paymaster_transactions: 0,
            user_paid_transactions: 0,
            chains_used: BTreeSet::new(),
            tx_types_used: BTreeSet::new(),
            preferred_chain: None,
            first_active: now,
            last_active: now,
            streak_days: 1,
            engagement_score: 0,
        }
    }
}

/// Append-only API-key usage journal, written off the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub usage_id: String,
    pub api_key_id: String,
    pub project_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub request_size: Option<u64>,
    pub response_size: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
