use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use nexus_chain::{AdapterSet, ChainRegistry, TxReceipt};
use nexus_common::model::{
    DeployStatus, OperationType, Project, TransactionLog, TransactionStatus, Wallet,
};
use nexus_common::{id, Chain, NexusError, Result};
use nexus_crypto::{derive, MasterSecret};
use nexus_store::{DeployBegin, Store};

use crate::paymaster::PaymasterService;

pub const TX_TYPE_WALLET_DEPLOYMENT: &str = "wallet_deployment";

/// Worst-case sponsored deploy cost used for the pre-recorded ledger row;
/// the receipt poller replaces it with the actual figure.
const PREDICTED_DEPLOY_GAS: u64 = 500_000;
const PREDICTED_DEPLOY_GAS_PRICE: u128 = 2_000_000_000;

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub wallet_id: String,
    pub chain: Chain,
    pub status: DeployStatus,
    pub tx_hash: Option<String>,
}

pub struct WalletService {
    store: Arc<Store>,
    master: MasterSecret,
    adapters: AdapterSet,
    registry: ChainRegistry,
    paymasters: Arc<PaymasterService>,
}

impl WalletService {
    pub fn new(
        store: Arc<Store>,
        master: MasterSecret,
        adapters: AdapterSet,
        registry: ChainRegistry,
        paymasters: Arc<PaymasterService>,
    ) -> Self {
        Self { store, master, adapters, registry, paymasters }
    }

    /// Owner key for a chain: secp256k1 EOA on EVM chains, Ed25519 on
    /// Solana. Pure function of the inputs and the master secret.
    fn owner_address(&self, project_id: &str, social_id: &str, social_type: &str, chain: Chain) -> Result<String> {
        if chain.is_evm() {
            Ok(self.master.evm_owner(project_id, social_id, social_type)?.address.clone())
        } else {
            Ok(self.master.solana_wallet(project_id, social_id, social_type)?.address.clone())
        }
    }

    async fn counterfactual_address(
        &self,
        project_id: &str,
        social_id: &str,
        social_type: &str,
        chain: Chain,
    ) -> Result<String> {
        let owner = self.owner_address(project_id, social_id, social_type, chain)?;
        let salt = derive::wallet_salt(project_id, social_id, social_type);
        self.adapters.get(chain)?.predict_wallet_address(&owner, &salt).await
    }

    /// Idempotent: repeating the same `(socialId, socialType)` returns the
    /// existing record, addresses unchanged.
    pub async fn create_wallet(
        &self,
        project: &Project,
        social_id: &str,
        social_type: &str,
        chains: Option<Vec<Chain>>,
        metadata: Option<Value>,
    ) -> Result<Wallet> {
        if social_id.trim().is_empty() {
            return Err(NexusError::validation_field("INVALID_SOCIAL_ID", "socialId is required", "socialId"));
        }
        if social_type.trim().is_empty() {
            return Err(NexusError::validation_field(
                "INVALID_SOCIAL_TYPE",
                "socialType is required",
                "socialType",
            ));
        }
        let chains = chains.unwrap_or_else(|| project.chains.clone());
        for chain in &chains {
            if !project.chains.contains(chain) {
                return Err(NexusError::validation_field(
                    "CHAIN_NOT_ENABLED",
                    format!("chain '{}' is not enabled for this project", chain),
                    "chains",
                ));
            }
        }

        let mut addresses = BTreeMap::new();
        for chain in &chains {
            let address =
                self.counterfactual_address(&project.id, social_id, social_type, *chain).await?;
            addresses.insert(*chain, address);
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: id::wallet_id(),
            project_id: project.id.clone(),
            social_id: social_id.to_string(),
            social_type: social_type.to_string(),
            addresses,
            deployments: BTreeMap::new(),
            metadata: metadata.as_ref().map(|v| v.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_wallet(&wallet)
    }

    pub fn get_wallet(&self, project_id: &str, wallet_id: &str) -> Result<Wallet> {
        self.store
            .get_wallet(wallet_id)?
            .filter(|w| w.project_id == project_id)
            .ok_or_else(|| NexusError::not_found(format!("wallet {}", wallet_id)))
    }

    pub fn list_wallets(&self, project_id: &str) -> Result<Vec<Wallet>> {
        self.store.list_wallets(project_id)
    }

    /// Idempotent deploy. A concurrent caller observes the in-flight tx
    /// hash; after confirmation the call is a no-op success.
    pub async fn deploy(&self, project: &Project, wallet_id: &str, chain: Chain, sponsored: bool) -> Result<DeployOutcome> {
        let wallet = self.get_wallet(&project.id, wallet_id)?;
        if !wallet.addresses.contains_key(&chain) {
            return Err(NexusError::validation_field(
                "CHAIN_NOT_ENABLED",
                format!("wallet has no address on '{}'", chain),
                "chains",
            ));
        }

        let now = Utc::now();
        match self.store.begin_wallet_deploy(wallet_id, chain, now)? {
            DeployBegin::AlreadyDeployed => {
                let state = wallet.deploy_state(chain);
                return Ok(DeployOutcome {
                    wallet_id: wallet.id,
                    chain,
                    status: DeployStatus::Deployed,
                    tx_hash: state.tx_hash,
                });
            }
            DeployBegin::AlreadyPending(tx_hash) => {
                return Ok(DeployOutcome { wallet_id: wallet.id, chain, status: DeployStatus::Pending, tx_hash });
            }
            DeployBegin::Started => {}
        }

        // we own the pending slot from here; any failure must release it
        match self.submit_deploy(project, &wallet, chain, sponsored).await {
            Ok(tx_hash) => Ok(DeployOutcome {
                wallet_id: wallet.id,
                chain,
                status: DeployStatus::Pending,
                tx_hash: Some(tx_hash),
            }),
            Err(e) => {
                let _ = self.store.complete_wallet_deploy(
                    wallet_id,
                    chain,
                    DeployStatus::Failed,
                    None,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn submit_deploy(
        &self,
        project: &Project,
        wallet: &Wallet,
        chain: Chain,
        sponsored: bool,
    ) -> Result<String> {
        let paymaster = if sponsored {
            Some(self.paymasters.ensure_can_sponsor(&project.id, chain)?)
        } else {
            None
        };

        let owner = self.owner_address(&project.id, &wallet.social_id, &wallet.social_type, chain)?;
        let salt = derive::wallet_salt(&project.id, &wallet.social_id, &wallet.social_type);
        let adapter = self.adapters.get(chain)?;
        let tx_hash = adapter
            .deploy_wallet(&owner, &salt, paymaster.as_ref().map(|p| p.address.as_str()))
            .await?;
        self.store.set_deploy_tx(&wallet.id, chain, &tx_hash)?;

        if let Some(paymaster) = &paymaster {
            let wallet_address = wallet.addresses.get(&chain).cloned().unwrap_or_default();
            self.paymasters
                .record_pending_payment(
                    &project.id,
                    chain,
                    &paymaster.address,
                    &wallet_address,
                    &tx_hash,
                    OperationType::WalletDeploy,
                    PREDICTED_DEPLOY_GAS as u128 * PREDICTED_DEPLOY_GAS_PRICE,
                    None,
                )
                .await?;
        }

        let cfg = self.registry.get(chain)?;
        self.store.insert_tx_log(&TransactionLog {
            id: id::tx_id(),
            project_id: project.id.clone(),
            transaction_type: TX_TYPE_WALLET_DEPLOYMENT.to_string(),
            chain,
            wallet_address: wallet.addresses.get(&chain).cloned().unwrap_or_default(),
            user_identifier: wallet.social_id.clone(),
            social_type: wallet.social_type.clone(),
            tx_hash: Some(tx_hash.clone()),
            block_number: None,
            gas_limit: Some(PREDICTED_DEPLOY_GAS),
            gas_used: None,
            gas_price: None,
            gas_cost_wei: None,
            gas_cost_usd: 0.0,
            currency: cfg.native_token.clone(),
            paymaster_paid: sponsored,
            paymaster_address: paymaster.map(|p| p.address),
            status: TransactionStatus::Pending,
            error_message: None,
            details: None,
            metadata: None,
            created_at: Utc::now(),
            confirmed_at: None,
        })?;

        tracing::info!(target: "wallet", wallet_id = %wallet.id, %chain, %tx_hash, "deploy submitted");
        Ok(tx_hash)
    }

    /// Applies a terminal receipt to the wallet state machine and settles
    /// the matching journal row. Called from the receipt poller.
    pub fn on_deploy_receipt(
        &self,
        wallet_id: &str,
        chain: Chain,
        tx_hash: &str,
        receipt: &TxReceipt,
        gas_cost_usd: f64,
    ) -> Result<Wallet> {
        let status = if receipt.success { DeployStatus::Deployed } else { DeployStatus::Failed };
        let error = (!receipt.success).then(|| "transaction reverted".to_string());
        let wallet =
            self.store.complete_wallet_deploy(wallet_id, chain, status, Some(receipt.block_number), error)?;

        if let Some(log) = self.store.get_tx_log_by_hash(tx_hash)? {
            let log_status =
                if receipt.success { TransactionStatus::Confirmed } else { TransactionStatus::Failed };
            self.store.settle_tx_log(
                &log.id,
                log_status,
                Some(receipt.block_number),
                Some(receipt.gas_used),
                Some(receipt.gas_price),
                Some(gas_cost_usd),
                (!receipt.success).then(|| "transaction reverted".to_string()),
                receipt.success.then(Utc::now),
            )?;
        }
        Ok(wallet)
    }

    /// Deadline expiry for a pending deploy: flip to failed so the caller
    /// can retry with a fresh transaction.
    pub fn on_deploy_timeout(&self, wallet_id: &str, chain: Chain, tx_hash: &str) -> Result<Wallet> {
        let wallet = self.store.complete_wallet_deploy(
            wallet_id,
            chain,
            DeployStatus::Failed,
            None,
            Some("deployment timed out".to_string()),
        )?;
        if let Some(log) = self.store.get_tx_log_by_hash(tx_hash)? {
            self.store.settle_tx_log(
                &log.id,
                TransactionStatus::Dropped,
                None,
                None,
                None,
                None,
                Some("deployment timed out".to_string()),
                None,
            )?;
        }
        Ok(wallet)
    }
}
