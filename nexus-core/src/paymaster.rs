use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use nexus_chain::{AdapterSet, ChainRegistry, PriceOracle, TxReceipt};
use nexus_common::model::{
    OperationType, PaymasterBalance, PaymasterPayment, PaymentStatus, ProjectPaymaster,
};
use nexus_common::{id, Chain, NexusError, Result};
use nexus_crypto::{derive, evm, KeyVault, MasterSecret};
use nexus_store::paymasters::PaymentPatch;
use nexus_store::Store;

pub const DEFAULT_LOW_THRESHOLD_USD: f64 = 10.0;
pub const DEFAULT_HARD_FLOOR_USD: f64 = 1.0;

/// External card/bank funding collaborator.
#[async_trait]
pub trait FundingProvider: Send + Sync {
    /// Returns a provider checkout reference the dashboard redirects to.
    async fn create_checkout(
        &self,
        project_id: &str,
        chain: Chain,
        deposit_address: &str,
        amount_usd: f64,
    ) -> Result<String>;
}

/// Default collaborator: no processor wired, self-custodial deposits only.
pub struct NoFundingProvider;

#[async_trait]
impl FundingProvider for NoFundingProvider {
    async fn create_checkout(&self, _: &str, _: Chain, _: &str, _: f64) -> Result<String> {
        Err(NexusError::validation(
            "FUNDING_METHOD_UNAVAILABLE",
            "card and bank funding are not configured; use a direct deposit",
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FundingInstruction {
    #[serde(rename_all = "camelCase")]
    Deposit {
        chain: Chain,
        address: String,
        /// Wallet-app payload (`ethereum:0x…` / `solana:…`).
        qr_payload: String,
    },
    #[serde(rename_all = "camelCase")]
    Checkout {
        chain: Chain,
        checkout_ref: String,
    },
}

/// Outcome of a balance refresh, with the thresholds already applied so the
/// caller knows what to signal.
#[derive(Debug, Clone)]
pub struct BalanceReport {
    pub balance: PaymasterBalance,
    pub below_low_threshold: bool,
    pub below_hard_floor: bool,
}

pub struct PaymasterService {
    store: Arc<Store>,
    master: MasterSecret,
    vault: KeyVault,
    adapters: AdapterSet,
    registry: ChainRegistry,
    oracle: Arc<dyn PriceOracle>,
    low_threshold_usd: f64,
    hard_floor_usd: f64,
}

impl PaymasterService {
    pub fn new(
        store: Arc<Store>,
        master: MasterSecret,
        vault: KeyVault,
        adapters: AdapterSet,
        registry: ChainRegistry,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            store,
            master,
            vault,
            adapters,
            registry,
            oracle,
            low_threshold_usd: DEFAULT_LOW_THRESHOLD_USD,
            hard_floor_usd: DEFAULT_HARD_FLOOR_USD,
        }
    }

    pub fn with_thresholds(mut self, low_usd: f64, floor_usd: f64) -> Self {
        self.low_threshold_usd = low_usd;
        self.hard_floor_usd = floor_usd;
        self
    }

    /// Derives the sponsor keypair and records the paymaster for one chain.
    /// On EVM the proxy address is CREATE2-predicted before anything lands
    /// on-chain, so projects can fund it immediately.
    pub fn provision(&self, project_id: &str, chain: Chain) -> Result<ProjectPaymaster> {
        let sponsor = self.master.paymaster(project_id, chain)?;
        let address = if chain.is_evm() {
            let cfg = self.registry.get(chain)?;
            let salt = derive::paymaster_salt(project_id, chain);
            let init_code_hash = evm::paymaster_init_code_hash(&sponsor.address)?;
            evm::create2_address(&cfg.paymaster_factory, &salt, &init_code_hash)?
        } else {
            sponsor.address.clone()
        };

        let paymaster = ProjectPaymaster {
            id: id::paymaster_id(),
            project_id: project_id.to_string(),
            chain,
            address,
            encrypted_private_key: self.vault.encrypt(project_id, &sponsor.secret)?,
            created_at: Utc::now(),
        };
        self.store.insert_paymaster(&paymaster)?;

        // balances start at zero until the refresher sweeps
        self.store.upsert_balance(&PaymasterBalance {
            project_id: project_id.to_string(),
            chain,
            address: paymaster.address.clone(),
            balance_native: 0.0,
            balance_wei: 0,
            balance_usd: 0.0,
            token_price_usd: 0.0,
            last_updated: Utc::now(),
            last_tx_hash: None,
        })?;

        tracing::info!(target: "paymaster", project_id, %chain, address = %paymaster.address, "provisioned paymaster");
        Ok(paymaster)
    }

    /// Rolls back a partially provisioned project.
    pub fn deprovision(&self, project_id: &str, chain: Chain) -> Result<()> {
        self.store.remove_paymaster(project_id, chain)
    }

    pub fn get_addresses(&self, project_id: &str) -> Result<Vec<ProjectPaymaster>> {
        self.store.list_project_paymasters(project_id)
    }

    /// Queries chain balance and the price oracle, updates the cached row,
    /// and reports threshold state.
    pub async fn refresh_balance(&self, project_id: &str, chain: Chain) -> Result<BalanceReport> {
        let paymaster = self
            .store
            .get_paymaster(project_id, chain)?
            .ok_or_else(|| NexusError::not_found(format!("paymaster for {} on {}", project_id, chain)))?;

        let adapter = self.adapters.get(chain)?;
        let raw = adapter.get_balance(&paymaster.address).await?;
        let price = self.oracle.price_usd(chain).await?;
        let cfg = self.registry.get(chain)?;
        let native = cfg.to_native(raw);

        let previous = self.store.get_balance(project_id, chain)?;
        let balance = PaymasterBalance {
            project_id: project_id.to_string(),
            chain,
            address: paymaster.address.clone(),
            balance_native: native,
            balance_wei: raw,
            balance_usd: native * price,
            token_price_usd: price,
            last_updated: Utc::now(),
            last_tx_hash: previous.and_then(|b| b.last_tx_hash),
        };
        self.store.upsert_balance(&balance)?;

        Ok(BalanceReport {
            below_low_threshold: balance.balance_usd < self.low_threshold_usd,
            below_hard_floor: balance.balance_usd < self.hard_floor_usd,
            balance,
        })
    }

    /// Cached balances; `force_refresh` re-queries each chain first.
    pub async fn get_balances(&self, project_id: &str, force_refresh: bool) -> Result<Vec<PaymasterBalance>> {
        let paymasters = self.store.list_project_paymasters(project_id)?;
        if paymasters.is_empty() {
            return Err(NexusError::not_found(format!("paymasters for {}", project_id)));
        }
        let mut out = Vec::with_capacity(paymasters.len());
        for pm in paymasters {
            if force_refresh {
                out.push(self.refresh_balance(project_id, pm.chain).await?.balance);
            } else if let Some(balance) = self.store.get_balance(project_id, pm.chain)? {
                out.push(balance);
            }
        }
        Ok(out)
    }

    /// Gate for new sponsorships: the project must be active and the cached
    /// balance above the hard floor. Below the warning threshold but above
    /// the floor, sponsorship proceeds; the refresher emits the webhook.
    pub fn ensure_can_sponsor(&self, project_id: &str, chain: Chain) -> Result<ProjectPaymaster> {
        let project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| NexusError::not_found(format!("project {}", project_id)))?;
        if !project.is_active() {
            return Err(NexusError::forbidden(
                "PROJECT_FROZEN",
                "paymaster sponsorship is disabled for this project",
            ));
        }
        if !project.settings.paymaster_enabled {
            return Err(NexusError::forbidden(
                "PAYMASTER_DISABLED",
                "paymaster sponsorship is turned off in project settings",
            ));
        }
        let paymaster = self
            .store
            .get_paymaster(project_id, chain)?
            .ok_or_else(|| NexusError::not_found(format!("paymaster for {} on {}", project_id, chain)))?;
        if let Some(balance) = self.store.get_balance(project_id, chain)? {
            if balance.balance_usd < self.hard_floor_usd {
                return Err(NexusError::conflict(
                    "PAYMASTER_INSUFFICIENT_FUNDS",
                    format!(
                        "paymaster balance ${:.2} is below the ${:.2} sponsorship floor",
                        balance.balance_usd, self.hard_floor_usd
                    ),
                ));
            }
        }
        Ok(paymaster)
    }

    /// Pre-records a pending ledger row with the predicted max cost before
    /// the operation is submitted; the receipt poller reconciles the rest.
    pub async fn record_pending_payment(
        &self,
        project_id: &str,
        chain: Chain,
        paymaster_address: &str,
        gas_for_address: &str,
        tx_hash: &str,
        operation_type: OperationType,
        predicted_max_wei: u128,
        user_operation_hash: Option<String>,
    ) -> Result<PaymasterPayment> {
        let cfg = self.registry.get(chain)?;
        let price = self.oracle.price_usd(chain).await.unwrap_or(0.0);
        let native = cfg.to_native(predicted_max_wei);
        let payment = PaymasterPayment {
            id: id::tx_id(),
            project_id: project_id.to_string(),
            paymaster_address: paymaster_address.to_string(),
            chain,
            amount: native,
            amount_wei: predicted_max_wei,
            gas_for_address: gas_for_address.to_string(),
            tx_hash: tx_hash.to_string(),
            block_number: None,
            gas_price: None,
            gas_used: None,
            usd_value: native * price,
            operation_type,
            user_operation_hash,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        };
        self.store.insert_payment(&payment)?;
        Ok(payment)
    }

    /// Receipt patch: actual cost from gasUsed × gasPrice, USD at the
    /// confirmation-time price. Monotonic per row.
    pub async fn settle_payment(&self, tx_hash: &str, receipt: &TxReceipt) -> Result<Option<PaymasterPayment>> {
        let Some(payment) = self.store.get_payment_by_txhash(tx_hash)? else {
            return Ok(None);
        };
        let cfg = self.registry.get(payment.chain)?;
        let price = self.oracle.price_usd(payment.chain).await.unwrap_or(payment.usd_value);
        let actual_wei = receipt.cost_wei();
        let native = cfg.to_native(actual_wei);
        let patched = self.store.patch_payment(
            &payment.id,
            PaymentPatch {
                status: if receipt.success { PaymentStatus::Confirmed } else { PaymentStatus::Failed },
                block_number: Some(receipt.block_number),
                gas_used: Some(receipt.gas_used),
                gas_price: Some(receipt.gas_price),
                amount_wei: Some(actual_wei),
                amount: Some(native),
                usd_value: Some(native * price),
            },
        )?;
        Ok(Some(patched))
    }

    /// USD value of a raw base-unit amount at the current oracle price.
    pub async fn usd_cost(&self, chain: Chain, raw: u128) -> f64 {
        let Ok(cfg) = self.registry.get(chain) else { return 0.0 };
        let price = self.oracle.price_usd(chain).await.unwrap_or(0.0);
        cfg.to_native(raw) * price
    }

    /// Total confirmed spend per chain, in raw base units. Monotonic.
    pub fn total_spent(&self, project_id: &str) -> Result<Vec<(Chain, u128)>> {
        let payments = self.store.list_payments(project_id, None, None)?;
        let mut totals: std::collections::BTreeMap<Chain, u128> = std::collections::BTreeMap::new();
        for payment in payments.iter().filter(|p| p.status == PaymentStatus::Confirmed) {
            *totals.entry(payment.chain).or_default() += payment.amount_wei;
        }
        Ok(totals.into_iter().collect())
    }

    pub fn list_payments(&self, project_id: &str) -> Result<Vec<PaymasterPayment>> {
        self.store.list_payments(project_id, None, None)
    }

    pub async fn fund(
        &self,
        project_id: &str,
        chain: Chain,
        method: &str,
        amount_usd: Option<f64>,
        provider: &dyn FundingProvider,
    ) -> Result<FundingInstruction> {
        let paymaster = self
            .store
            .get_paymaster(project_id, chain)?
            .ok_or_else(|| NexusError::not_found(format!("paymaster for {} on {}", project_id, chain)))?;

        match method {
            "deposit" => Ok(FundingInstruction::Deposit {
                chain,
                qr_payload: format!("{}:{}", chain, paymaster.address),
                address: paymaster.address,
            }),
            "card" | "bank" => {
                let checkout_ref = provider
                    .create_checkout(project_id, chain, &paymaster.address, amount_usd.unwrap_or(0.0))
                    .await?;
                Ok(FundingInstruction::Checkout { chain, checkout_ref })
            }
            other => Err(NexusError::validation_field(
                "INVALID_FUNDING_METHOD",
                format!("unknown funding method '{}'", other),
                "method",
            )
            .with_suggestions(&["supported methods: deposit, card, bank"])),
        }
    }

    pub fn low_threshold_usd(&self) -> f64 {
        self.low_threshold_usd
    }
}
