use async_trait::async_trait;
use serde::Serialize;

use nexus_common::Chain;

/// Outbound events POSTed to a project's webhook URL, HMAC-signed over the
/// body. Delivery is fire-and-forget.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    #[serde(rename = "wallet.deployed")]
    WalletDeployed {
        wallet_id: String,
        chain: Chain,
        address: String,
        tx_hash: String,
        block_number: Option<u64>,
    },
    #[serde(rename = "wallet.deploy_failed")]
    WalletDeployFailed { wallet_id: String, chain: Chain, error: String },
    #[serde(rename = "paymaster.low_balance")]
    PaymasterLowBalance { chain: Chain, address: String, balance_usd: f64, threshold_usd: f64 },
    #[serde(rename = "paymaster.payment_confirmed")]
    PaymasterPaymentConfirmed {
        payment_id: String,
        chain: Chain,
        tx_hash: String,
        amount_wei: String,
        usd_value: f64,
    },
    #[serde(rename = "apikey.rotated")]
    ApiKeyRotated { old_key_id: String, new_key_id: String, grace_hours: i64 },
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Delivers `event` to the project's configured webhook URL, if any.
    /// Implementations never surface delivery errors to the caller.
    async fn send(&self, project_id: &str, event: WebhookEvent);
}

/// No-op sender for tests and unconfigured deployments.
pub struct NullWebhookSender;

#[async_trait]
impl WebhookSender for NullWebhookSender {
    async fn send(&self, _project_id: &str, _event: WebhookEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_dotted_names() {
        let event = WebhookEvent::WalletDeployed {
            wallet_id: "wal_1".into(),
            chain: Chain::Ethereum,
            address: "0xabc".into(),
            tx_hash: "0xdef".into(),
            block_number: Some(7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "wallet.deployed");
        assert_eq!(json["chain"], "ethereum");
    }
}
