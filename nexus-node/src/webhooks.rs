use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use nexus_core::{WebhookEvent, WebhookSender};
use nexus_store::Store;

type HmacSha256 = Hmac<Sha256>;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed webhook delivery: HMAC-SHA256 over the JSON body, hex in the
/// `x-nexus-signature` header. Fire-and-forget with one retry; failures
/// are logged, never surfaced.
pub struct HttpWebhookSender {
    store: Arc<Store>,
    http: reqwest::Client,
    secret: String,
}

impl HttpWebhookSender {
    pub fn new(store: Arc<Store>, secret: String) -> Self {
        Self { store, http: reqwest::Client::new(), secret }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn deliver(&self, url: &str, body: Vec<u8>, signature: String) -> bool {
        for attempt in 0..2u8 {
            let result = self
                .http
                .post(url)
                .timeout(DELIVERY_TIMEOUT)
                .header("content-type", "application/json")
                .header("x-nexus-signature", &signature)
                .body(body.clone())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    tracing::warn!(target: "webhook", url, status = %response.status(), attempt, "webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(target: "webhook", url, attempt, "webhook delivery failed: {}", e);
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        false
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, project_id: &str, event: WebhookEvent) {
        let url = match self.store.get_project(project_id) {
            Ok(Some(project)) => match project.settings.webhook_url {
                Some(url) if !url.is_empty() => url,
                _ => return,
            },
            _ => return,
        };

        let body = match serde_json::to_vec(&event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(target: "webhook", "event serialization failed: {}", e);
                return;
            }
        };
        let signature = self.sign(&body);
        self.deliver(&url, body, signature).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hmac_hex() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("nexus.redb")).unwrap());
        let sender = HttpWebhookSender::new(store, "hook-secret".into());
        let a = sender.sign(b"{\"event\":\"wallet.deployed\"}");
        let b = sender.sign(b"{\"event\":\"wallet.deployed\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sender.sign(b"{}"));
    }
}
