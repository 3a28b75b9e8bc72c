use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Undeployed,
    Pending,
    Deployed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployState {
    pub status: DeployStatus,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl DeployState {
    pub fn undeployed() -> Self {
        Self { status: DeployStatus::Undeployed, tx_hash: None, block_number: None, error: None, started_at: None }
    }

    /// `undeployed → pending → deployed | failed`; `deployed` terminal,
    /// `failed → pending` only via explicit redeploy.
    pub fn may_begin_deploy(&self) -> bool {
        matches!(self.status, DeployStatus::Undeployed | DeployStatus::Failed)
    }
}

/// Per-user wallet record across chains. Addresses are pure functions of
/// `(projectId, socialId, socialType, chain factory)` and never change;
/// only deployment state mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub project_id: String,
    pub social_id: String,
    /// Opaque caller-supplied tag (email, phone, gameId, ...). The core
    /// stores it and indexes on it, nothing more.
    pub social_type: String,
    pub addresses: BTreeMap<Chain, String>,
    pub deployments: BTreeMap<Chain, DeployState>,
    /// Caller-supplied JSON, stored as text so the record stays
    /// bincode-friendly.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn deploy_state(&self, chain: Chain) -> DeployState {
        self.deployments.get(&chain).cloned().unwrap_or_else(DeployState::undeployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_gate() {
        let mut st = DeployState::undeployed();
        assert!(st.may_begin_deploy());
        st.status = DeployStatus::Pending;
        assert!(!st.may_begin_deploy());
        st.status = DeployStatus::Deployed;
        assert!(!st.may_begin_deploy());
        st.status = DeployStatus::Failed;
        assert!(st.may_begin_deploy());
    }
}
