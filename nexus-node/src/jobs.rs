use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tokio::time::{interval, Instant};

use nexus_common::model::TransactionStatus;
use nexus_common::Chain;
use nexus_core::WebhookEvent;

use crate::state::AppState;

/// Deploy deadline: a pending transaction with no receipt after this long
/// flips to failed so the caller can retry.
pub const DEPLOY_DEADLINE: Duration = Duration::from_secs(15 * 60);
const POLL_BASE_INTERVAL: Duration = Duration::from_secs(2);
const POLL_MAX_INTERVAL: Duration = Duration::from_secs(60);
const BALANCE_SWEEP_INTERVAL: Duration = Duration::from_secs(4 * 60);
const ROLLUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct PendingDeploy {
    pub project_id: String,
    pub wallet_id: String,
    pub chain: Chain,
    pub tx_hash: String,
    pub enqueued: Instant,
    pub next_poll: Instant,
    pub poll_interval: Duration,
}

/// Work queue for receipt polling. Decoupled from request lifetimes: a
/// client disconnect never cancels reconciliation of a submitted tx.
pub struct ReceiptPoller {
    queue: Mutex<Vec<PendingDeploy>>,
}

impl ReceiptPoller {
    pub fn new() -> Self {
        Self { queue: Mutex::new(Vec::new()) }
    }

    pub async fn enqueue_deploy(&self, project_id: &str, wallet_id: &str, chain: Chain, tx_hash: &str) {
        let now = Instant::now();
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|item| item.tx_hash == tx_hash) {
            return;
        }
        queue.push(PendingDeploy {
            project_id: project_id.to_string(),
            wallet_id: wallet_id.to_string(),
            chain,
            tx_hash: tx_hash.to_string(),
            enqueued: now,
            next_poll: now,
            poll_interval: POLL_BASE_INTERVAL,
        });
    }

    async fn take_due(&self) -> Vec<PendingDeploy> {
        let now = Instant::now();
        let mut queue = self.queue.lock().await;
        let mut due = Vec::new();
        let mut keep = Vec::with_capacity(queue.len());
        for item in queue.drain(..) {
            if item.next_poll <= now {
                due.push(item);
            } else {
                keep.push(item);
            }
        }
        *queue = keep;
        due
    }

    async fn reinsert(&self, mut item: PendingDeploy) {
        item.poll_interval = (item.poll_interval * 2).min(POLL_MAX_INTERVAL);
        item.next_poll = Instant::now() + item.poll_interval;
        self.queue.lock().await.push(item);
    }

    pub async fn depth(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for ReceiptPoller {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-queues deploys that were in flight when the process last stopped.
pub async fn recover_pending(state: &AppState) {
    match state.store.list_pending_deploys() {
        Ok(pending) => {
            for (wallet, chain) in pending {
                if let Some(tx_hash) = wallet.deploy_state(chain).tx_hash {
                    state
                        .poller
                        .enqueue_deploy(&wallet.project_id, &wallet.id, chain, &tx_hash)
                        .await;
                }
            }
        }
        Err(e) => tracing::warn!(target: "jobs", "pending-deploy recovery failed: {}", e),
    }
}

pub fn spawn_all(state: AppState) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        state.usage.spawn_writer(state.store.clone()),
        spawn_receipt_poller(state.clone()),
        spawn_balance_refresher(state.clone()),
        spawn_daily_rollup(state),
    ]
}

pub fn spawn_receipt_poller(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            for item in state.poller.take_due().await {
                match settle_deploy(&state, &item).await {
                    Ok(true) => {}
                    Ok(false) => state.poller.reinsert(item).await,
                    Err(e) => {
                        tracing::warn!(target: "jobs", tx_hash = %item.tx_hash, "receipt poll failed: {}", e);
                        state.poller.reinsert(item).await;
                    }
                }
            }
        }
    })
}

/// One poll pass for one pending deploy. Returns true when the item is
/// finished (confirmed, failed, or timed out).
async fn settle_deploy(state: &AppState, item: &PendingDeploy) -> nexus_common::Result<bool> {
    let adapter = state.adapters.get(item.chain)?;
    let receipt = adapter.get_receipt(&item.tx_hash).await?;

    let Some(receipt) = receipt else {
        if item.enqueued.elapsed() >= DEPLOY_DEADLINE {
            state.wallets.on_deploy_timeout(&item.wallet_id, item.chain, &item.tx_hash)?;
            state
                .webhooks
                .send(
                    &item.project_id,
                    WebhookEvent::WalletDeployFailed {
                        wallet_id: item.wallet_id.clone(),
                        chain: item.chain,
                        error: "deployment timed out".into(),
                    },
                )
                .await;
            return Ok(true);
        }
        return Ok(false);
    };

    // sponsored deploys have a pending ledger row to reconcile
    let payment = state.paymasters.settle_payment(&item.tx_hash, &receipt).await?;
    let gas_cost_usd = match &payment {
        Some(p) => p.usd_value,
        None => state.paymasters.usd_cost(item.chain, receipt.cost_wei()).await,
    };

    let wallet =
        state
            .wallets
            .on_deploy_receipt(&item.wallet_id, item.chain, &item.tx_hash, &receipt, gas_cost_usd)?;

    if receipt.success {
        if let Some(log) = state.store.get_tx_log_by_hash(&item.tx_hash)? {
            if log.status == TransactionStatus::Confirmed {
                state.analytics.record_confirmed_tx(&log)?;
            }
        }
        let address = wallet.addresses.get(&item.chain).cloned().unwrap_or_default();
        state
            .webhooks
            .send(
                &item.project_id,
                WebhookEvent::WalletDeployed {
                    wallet_id: item.wallet_id.clone(),
                    chain: item.chain,
                    address,
                    tx_hash: item.tx_hash.clone(),
                    block_number: Some(receipt.block_number),
                },
            )
            .await;
        if let Some(payment) = payment {
            state
                .webhooks
                .send(
                    &item.project_id,
                    WebhookEvent::PaymasterPaymentConfirmed {
                        payment_id: payment.id,
                        chain: payment.chain,
                        tx_hash: payment.tx_hash,
                        amount_wei: payment.amount_wei.to_string(),
                        usd_value: payment.usd_value,
                    },
                )
                .await;
        }
    } else {
        state
            .webhooks
            .send(
                &item.project_id,
                WebhookEvent::WalletDeployFailed {
                    wallet_id: item.wallet_id.clone(),
                    chain: item.chain,
                    error: "transaction reverted".into(),
                },
            )
            .await;
    }
    Ok(true)
}

/// Fixed-interval sweep over every paymaster: refresh the cached balance
/// and signal low balances.
pub fn spawn_balance_refresher(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(BALANCE_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let paymasters = match state.store.list_all_paymasters() {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(target: "jobs", "paymaster sweep failed: {}", e);
                    continue;
                }
            };
            for pm in paymasters {
                match state.paymasters.refresh_balance(&pm.project_id, pm.chain).await {
                    Ok(report) if report.below_low_threshold => {
                        state
                            .webhooks
                            .send(
                                &pm.project_id,
                                WebhookEvent::PaymasterLowBalance {
                                    chain: pm.chain,
                                    address: pm.address.clone(),
                                    balance_usd: report.balance.balance_usd,
                                    threshold_usd: state.paymasters.low_threshold_usd(),
                                },
                            )
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(target: "jobs", project_id = %pm.project_id, chain = %pm.chain, "balance refresh failed: {}", e);
                    }
                }
            }
        }
    })
}

/// Nightly replayable roll-up of yesterday's metrics per project.
pub fn spawn_daily_rollup(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(ROLLUP_INTERVAL);
        loop {
            tick.tick().await;
            let yesterday = (Utc::now() - ChronoDuration::days(1)).date_naive();
            let projects = match state.store.list_all_projects() {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(target: "jobs", "rollup project scan failed: {}", e);
                    continue;
                }
            };
            for project in projects {
                match state.analytics.rollup_day(&project.id, yesterday) {
                    Ok(rows) => {
                        tracing::info!(target: "jobs", project_id = %project.id, %yesterday, rows = rows.len(), "daily rollup");
                    }
                    Err(e) => {
                        tracing::warn!(target: "jobs", project_id = %project.id, "daily rollup failed: {}", e);
                    }
                }
            }
        }
    })
}
