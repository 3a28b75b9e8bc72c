use std::collections::HashMap;
use std::sync::Arc;

use nexus_chain::evm::EvmAdapter;
use nexus_chain::mock::MockChainAdapter;
use nexus_chain::solana::SolanaAdapter;
use nexus_chain::{
    AdapterSet, ChainAdapter, ChainRegistry, HttpPriceOracle, PriceOracle, StaticPriceOracle,
};
use nexus_common::{Chain, Result};
use nexus_core::email::{EmailSender, LogEmailSender};
use nexus_core::paymaster::{FundingProvider, NoFundingProvider};
use nexus_core::{
    AnalyticsService, ApiKeyService, IdentityService, PaymasterService, ProjectService,
    WalletService, WebhookSender,
};
use nexus_crypto::{KeyVault, MasterSecret};
use nexus_store::Store;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::jobs::ReceiptPoller;
use crate::ratelimit::SlidingWindowLimiter;
use crate::usage::UsageRecorder;
use crate::webhooks::HttpWebhookSender;

/// Everything the pipeline and handlers share. Caches, counters, and
/// queues are explicit collaborators here, not module globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub identity: Arc<IdentityService>,
    pub projects: Arc<ProjectService>,
    pub keys: Arc<ApiKeyService>,
    pub wallets: Arc<WalletService>,
    pub paymasters: Arc<PaymasterService>,
    pub analytics: Arc<AnalyticsService>,
    pub adapters: AdapterSet,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub cache: Arc<ResponseCache>,
    pub usage: Arc<UsageRecorder>,
    pub webhooks: Arc<dyn WebhookSender>,
    pub funding: Arc<dyn FundingProvider>,
    pub poller: Arc<ReceiptPoller>,
}

impl AppState {
    pub fn build(config: Config, store: Arc<Store>) -> Result<Self> {
        let config = Arc::new(config);
        let vault = KeyVault::from_hex(&config.encryption_key_hex)?;
        let master = MasterSecret::from_hex(&config.master_secret_hex)?;
        let registry = ChainRegistry::from_env();

        let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
        for chain in Chain::ALL {
            let adapter: Arc<dyn ChainAdapter> = if config.use_mock_chains {
                Arc::new(MockChainAdapter::new(chain))
            } else if chain.is_evm() {
                Arc::new(EvmAdapter::new(registry.get(chain)?.clone()))
            } else {
                Arc::new(SolanaAdapter::new(registry.get(chain)?.clone()))
            };
            adapters.insert(chain, adapter);
        }
        let adapters = AdapterSet::new(adapters);

        let oracle: Arc<dyn PriceOracle> = match &config.price_oracle_url {
            Some(url) => Arc::new(HttpPriceOracle::new(url.clone(), config.price_oracle_key.clone())),
            None => Arc::new(StaticPriceOracle::default()),
        };

        let email: Arc<dyn EmailSender> = Arc::new(LogEmailSender);
        let webhooks: Arc<dyn WebhookSender> =
            Arc::new(HttpWebhookSender::new(store.clone(), config.webhook_secret.clone()));

        let paymasters = Arc::new(PaymasterService::new(
            store.clone(),
            master.clone(),
            vault.clone(),
            adapters.clone(),
            registry.clone(),
            oracle,
        ));
        let wallets = Arc::new(WalletService::new(
            store.clone(),
            master,
            adapters.clone(),
            registry,
            paymasters.clone(),
        ));

        Ok(Self {
            identity: Arc::new(IdentityService::new(store.clone(), email.clone(), config.jwt_secret.clone())),
            projects: Arc::new(ProjectService::new(store.clone(), paymasters.clone(), email)),
            keys: Arc::new(ApiKeyService::new(store.clone(), vault)),
            analytics: Arc::new(AnalyticsService::new(store.clone())),
            wallets,
            paymasters,
            adapters,
            limiter: Arc::new(SlidingWindowLimiter::new()),
            cache: Arc::new(ResponseCache::new()),
            usage: UsageRecorder::new(),
            webhooks,
            funding: Arc::new(NoFundingProvider),
            poller: Arc::new(ReceiptPoller::new()),
            store,
            config,
        })
    }
}
