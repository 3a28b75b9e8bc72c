use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use nexus_chain::mock::MockChainAdapter;
use nexus_chain::{AdapterSet, ChainAdapter, ChainRegistry, StaticPriceOracle};
use nexus_common::model::{
    ApiKeyType, DeployStatus, IpAllowEntry, PaymentStatus, TransactionLog, TransactionStatus,
};
use nexus_common::perms::{grant_allows, Permission};
use nexus_common::{Chain, Environment};
use nexus_core::apikey::parse_api_key;
use nexus_core::email::LogEmailSender;
use nexus_core::{
    AnalyticsService, ApiKeyService, IdentityService, PaymasterService, ProjectService,
    WalletService,
};
use nexus_crypto::{KeyVault, MasterSecret};
use nexus_store::Store;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    mocks: HashMap<Chain, Arc<MockChainAdapter>>,
    identity: IdentityService,
    projects: ProjectService,
    keys: ApiKeyService,
    wallets: WalletService,
    paymasters: Arc<PaymasterService>,
    analytics: AnalyticsService,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("nexus.redb")).unwrap());
    let vault = KeyVault::new([7u8; 32]);
    let master = MasterSecret::new([42u8; 32]);
    let registry = ChainRegistry::from_env();
    let email = Arc::new(LogEmailSender);

    let mut mocks = HashMap::new();
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    for chain in Chain::ALL {
        let mock = Arc::new(MockChainAdapter::new(chain));
        adapters.insert(chain, mock.clone() as Arc<dyn ChainAdapter>);
        mocks.insert(chain, mock);
    }
    let adapters = AdapterSet::new(adapters);

    let paymasters = Arc::new(PaymasterService::new(
        store.clone(),
        master.clone(),
        vault.clone(),
        adapters.clone(),
        registry.clone(),
        Arc::new(StaticPriceOracle::default()),
    ));

    Harness {
        identity: IdentityService::new(store.clone(), email.clone(), "test-secret".into()),
        projects: ProjectService::new(store.clone(), paymasters.clone(), email),
        keys: ApiKeyService::new(store.clone(), vault),
        wallets: WalletService::new(
            store.clone(),
            master,
            adapters,
            registry,
            paymasters.clone(),
        ),
        analytics: AnalyticsService::new(store.clone()),
        paymasters,
        mocks,
        store,
        _dir: dir,
    }
}

async fn fund_paymaster(h: &Harness, project_id: &str, chain: Chain, raw: u128) {
    let pm = h.store.get_paymaster(project_id, chain).unwrap().unwrap();
    h.mocks[&chain].set_balance(&pm.address, raw);
    h.paymasters.refresh_balance(project_id, chain).await.unwrap();
}

#[tokio::test]
async fn s1_project_bootstrap() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let token = user.verification_token.clone().unwrap();
    let user = h.identity.verify_email(&token).unwrap();
    assert!(user.email_verified);

    let project = h
        .projects
        .create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum, Chain::Solana])
        .unwrap();
    assert_eq!(project.slug, "defi-app");

    let paymasters = h.paymasters.get_addresses(&project.id).unwrap();
    assert_eq!(paymasters.len(), 2);
    for pm in &paymasters {
        let balance = h.store.get_balance(&project.id, pm.chain).unwrap().unwrap();
        assert_eq!(balance.balance_wei, 0);
    }

    let members = h.store.list_members(&project.id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, user.id);
}

#[tokio::test]
async fn s2_slug_collision_appends_suffix() {
    let h = harness();
    let alice = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let bob = h.identity.register("bob@acme.com", "P@ssw0rd1", "Bob", None).await.unwrap();

    let first = h.projects.create_project(&alice, "My App", None, None, vec![Chain::Ethereum]).unwrap();
    let second = h.projects.create_project(&bob, "My App", None, None, vec![Chain::Ethereum]).unwrap();
    assert_eq!(first.slug, "my-app");
    assert_eq!(second.slug, "my-app-2");
}

#[tokio::test]
async fn s3_api_key_round_trip_and_permissions() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let (record, plaintext) = h
        .keys
        .create_key(
            &project.id,
            &user.id,
            "server",
            ApiKeyType::Production,
            Some(vec![Permission::WalletsCreate, Permission::WalletsRead]),
            vec![],
            None,
        )
        .unwrap();

    let parsed = parse_api_key(&plaintext).unwrap();
    assert_eq!(parsed.project_id, project.id);
    assert_eq!(format!("key_{}", parsed.key_id), record.id);

    let auth = h.keys.authenticate(&plaintext, None, Environment::Development).unwrap();
    assert_eq!(auth.project.id, project.id);
    assert!(grant_allows(&auth.key.permissions, Permission::WalletsRead));
    assert!(!grant_allows(&auth.key.permissions, Permission::WalletsDeploy));
}

#[tokio::test]
async fn s4_wallet_determinism_and_idempotent_deploy() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();
    fund_paymaster(&h, &project.id, Chain::Ethereum, 10_000_000_000_000_000_000).await;

    let first = h
        .wallets
        .create_wallet(&project, "bob@x.io", "email", Some(vec![Chain::Ethereum]), None)
        .await
        .unwrap();
    let second = h
        .wallets
        .create_wallet(&project, "bob@x.io", "email", Some(vec![Chain::Ethereum]), None)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.addresses[&Chain::Ethereum], second.addresses[&Chain::Ethereum]);
    assert_eq!(h.wallets.list_wallets(&project.id).unwrap().len(), 1);

    let deploy = h.wallets.deploy(&project, &first.id, Chain::Ethereum, true).await.unwrap();
    assert_eq!(deploy.status, DeployStatus::Pending);
    let tx_hash = deploy.tx_hash.clone().unwrap();

    // concurrent retry observes the same pending hash
    let retry = h.wallets.deploy(&project, &first.id, Chain::Ethereum, true).await.unwrap();
    assert_eq!(retry.status, DeployStatus::Pending);
    assert_eq!(retry.tx_hash.as_deref(), Some(tx_hash.as_str()));

    // receipt lands
    let receipt = h.mocks[&Chain::Ethereum].get_receipt(&tx_hash).await.unwrap().unwrap();
    let settled = h.paymasters.settle_payment(&tx_hash, &receipt).await.unwrap().unwrap();
    assert_eq!(settled.status, PaymentStatus::Confirmed);
    let wallet = h
        .wallets
        .on_deploy_receipt(&first.id, Chain::Ethereum, &tx_hash, &receipt, 0.11)
        .unwrap();
    assert_eq!(wallet.deploy_state(Chain::Ethereum).status, DeployStatus::Deployed);

    // after confirmation, deploy is a no-op success
    let after = h.wallets.deploy(&project, &first.id, Chain::Ethereum, true).await.unwrap();
    assert_eq!(after.status, DeployStatus::Deployed);

    // exactly one journal row, confirmed and paymaster-backed
    let logs = h.store.list_tx_logs(&project.id, None, None).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, TransactionStatus::Confirmed);
    assert!(logs[0].paymaster_paid);
    // invariant: confirmed + paymasterPaid implies a payment with that hash
    let payment = h.store.get_payment_by_txhash(&tx_hash).unwrap().unwrap();
    assert_eq!(payment.project_id, project.id);
}

#[tokio::test]
async fn s5_paymaster_coverage_accounting() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let now = Utc::now();
    for i in 0..15 {
        let sponsored = i < 10;
        let log = TransactionLog {
            id: format!("tx_{:02}", i),
            project_id: project.id.clone(),
            transaction_type: "transaction_sponsor".into(),
            chain: Chain::Ethereum,
            wallet_address: format!("0x{:040x}", i),
            user_identifier: format!("user{}@x.io", i % 4),
            social_type: "email".into(),
            tx_hash: Some(format!("0xhash{:02}", i)),
            block_number: Some(100 + i),
            gas_limit: None,
            gas_used: Some(21_000),
            gas_price: Some(1_000_000_000),
            gas_cost_wei: Some(21_000_000_000_000),
            gas_cost_usd: 0.05,
            currency: "ETH".into(),
            paymaster_paid: sponsored,
            paymaster_address: None,
            status: TransactionStatus::Confirmed,
            error_message: None,
            details: None,
            metadata: None,
            created_at: now - Duration::hours(2),
            confirmed_at: Some(now - Duration::hours(1)),
        };
        h.store.insert_tx_log(&log).unwrap();
    }

    let overview = h.analytics.overview(&project.id, 1).unwrap();
    assert_eq!(overview.total_transactions, 15);
    assert_eq!(overview.paymaster_transactions, 10);
    assert!((overview.paymaster_coverage_pct - 66.67).abs() < 0.01);
    assert_eq!(overview.distinct_users, 4);
}

#[tokio::test]
async fn daily_rollup_is_replayable() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let yesterday = Utc::now() - Duration::days(1);
    for i in 0..6 {
        let log = TransactionLog {
            id: format!("tx_{}", i),
            project_id: project.id.clone(),
            transaction_type: "transaction_sponsor".into(),
            chain: Chain::Ethereum,
            wallet_address: format!("0x{:040x}", i),
            user_identifier: format!("user{}@x.io", i % 2),
            social_type: "email".into(),
            tx_hash: Some(format!("0xr{}", i)),
            block_number: Some(i),
            gas_limit: None,
            gas_used: Some(21_000),
            gas_price: Some(1_000_000_000),
            gas_cost_wei: None,
            gas_cost_usd: 0.03,
            currency: "ETH".into(),
            paymaster_paid: i % 3 != 0,
            paymaster_address: None,
            status: TransactionStatus::Confirmed,
            error_message: None,
            details: None,
            metadata: None,
            created_at: yesterday,
            confirmed_at: Some(yesterday),
        };
        h.store.insert_tx_log(&log).unwrap();
    }

    let first = h.analytics.rollup_day(&project.id, yesterday.date_naive()).unwrap();
    let second = h.analytics.rollup_day(&project.id, yesterday.date_naive()).unwrap();
    assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].count, 6);
    assert_eq!(first[0].unique_users, 2);
    assert_eq!(first[0].paymaster_tx, 4);
}

#[tokio::test]
async fn s6_ip_allowlist_enforcement() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let allowlist = vec![IpAllowEntry {
        ip: "203.0.113.5".into(),
        description: Some("office".into()),
        added_at: Utc::now(),
    }];
    let (_, plaintext) = h
        .keys
        .create_key(&project.id, &user.id, "prod", ApiKeyType::Production, None, allowlist, None)
        .unwrap();

    assert!(h.keys.authenticate(&plaintext, Some("203.0.113.5"), Environment::Production).is_ok());
    let err = h
        .keys
        .authenticate(&plaintext, Some("203.0.113.6"), Environment::Production)
        .unwrap_err();
    assert_eq!(err.code(), "IP_NOT_WHITELISTED");
    assert_eq!(err.http_status(), 403);

    // development ignores the allowlist entirely
    assert!(h.keys.authenticate(&plaintext, Some("203.0.113.6"), Environment::Development).is_ok());
}

#[tokio::test]
async fn rotation_grace_accepts_both_keys() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let (old_record, old_plaintext) = h
        .keys
        .create_key(&project.id, &user.id, "server", ApiKeyType::Dev, None, vec![], None)
        .unwrap();
    let (new_record, new_plaintext, rotated) =
        h.keys.rotate_key(&project.id, &old_record.id, &user.id).unwrap();
    assert_ne!(new_record.id, old_record.id);
    assert!(rotated.grace_until.is_some());

    assert!(h.keys.authenticate(&old_plaintext, None, Environment::Development).is_ok());
    assert!(h.keys.authenticate(&new_plaintext, None, Environment::Development).is_ok());

    // revocation is immediate, no grace
    h.keys.revoke_key(&project.id, &new_record.id).unwrap();
    assert_eq!(
        h.keys.authenticate(&new_plaintext, None, Environment::Development).unwrap_err().code(),
        "API_KEY_REVOKED"
    );
}

#[tokio::test]
async fn paymaster_floor_blocks_sponsorship() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    // ~ $0.88 at the static $2500/ETH price: above zero, below the $1 floor
    fund_paymaster(&h, &project.id, Chain::Ethereum, 350_000_000_000_000).await;
    let err = h.paymasters.ensure_can_sponsor(&project.id, Chain::Ethereum).unwrap_err();
    assert_eq!(err.code(), "PAYMASTER_INSUFFICIENT_FUNDS");

    // ~ $8.75: above the floor, below the $10 warning threshold
    fund_paymaster(&h, &project.id, Chain::Ethereum, 3_500_000_000_000_000).await;
    assert!(h.paymasters.ensure_can_sponsor(&project.id, Chain::Ethereum).is_ok());
    let report = h.paymasters.refresh_balance(&project.id, Chain::Ethereum).await.unwrap();
    assert!(report.below_low_threshold);
    assert!(!report.below_hard_floor);
}

#[tokio::test]
async fn soft_delete_revokes_keys_and_freezes_paymasters() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();
    fund_paymaster(&h, &project.id, Chain::Ethereum, 10_000_000_000_000_000_000).await;

    let (_, plaintext) = h
        .keys
        .create_key(&project.id, &user.id, "server", ApiKeyType::Dev, None, vec![], None)
        .unwrap();

    h.projects.delete_project(&project.id, &user.id).unwrap();

    assert_eq!(h.projects.get_project(&project.id).unwrap_err().http_status(), 404);
    assert_eq!(
        h.keys.authenticate(&plaintext, None, Environment::Development).unwrap_err().code(),
        "API_KEY_REVOKED"
    );
    assert_eq!(
        h.paymasters.ensure_can_sponsor(&project.id, Chain::Ethereum).unwrap_err().code(),
        "PROJECT_FROZEN"
    );
}

#[tokio::test]
async fn failed_deploy_can_retry_with_fresh_tx() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h.projects.create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum]).unwrap();

    let wallet = h
        .wallets
        .create_wallet(&project, "bob@x.io", "email", None, None)
        .await
        .unwrap();

    h.mocks[&Chain::Ethereum].fail_next_submission();
    let deploy = h.wallets.deploy(&project, &wallet.id, Chain::Ethereum, false).await.unwrap();
    let tx_hash = deploy.tx_hash.unwrap();
    let receipt = h.mocks[&Chain::Ethereum].get_receipt(&tx_hash).await.unwrap().unwrap();
    assert!(!receipt.success);

    let failed = h
        .wallets
        .on_deploy_receipt(&wallet.id, Chain::Ethereum, &tx_hash, &receipt, 0.0)
        .unwrap();
    assert_eq!(failed.deploy_state(Chain::Ethereum).status, DeployStatus::Failed);

    // explicit retry moves failed back to pending
    let retry = h.wallets.deploy(&project, &wallet.id, Chain::Ethereum, false).await.unwrap();
    assert_eq!(retry.status, DeployStatus::Pending);
}

#[tokio::test]
async fn engagement_flows_from_confirmed_transactions() {
    let h = harness();
    let user = h.identity.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
    let project = h
        .projects
        .create_project(&user, "DeFi App", None, None, vec![Chain::Ethereum, Chain::Solana])
        .unwrap();

    let now = Utc::now();
    for (i, chain) in [Chain::Ethereum, Chain::Solana, Chain::Ethereum].iter().enumerate() {
        let log = TransactionLog {
            id: format!("tx_{}", i),
            project_id: project.id.clone(),
            transaction_type: "transaction_sponsor".into(),
            chain: *chain,
            wallet_address: "0xwallet".into(),
            user_identifier: "bob@x.io".into(),
            social_type: "email".into(),
            tx_hash: Some(format!("0xh{}", i)),
            block_number: Some(1),
            gas_limit: None,
            gas_used: Some(21_000),
            gas_price: Some(1_000_000_000),
            gas_cost_wei: None,
            gas_cost_usd: 0.02,
            currency: "ETH".into(),
            paymaster_paid: true,
            paymaster_address: None,
            status: TransactionStatus::Confirmed,
            error_message: None,
            details: None,
            metadata: None,
            created_at: now,
            confirmed_at: Some(now),
        };
        h.store.insert_tx_log(&log).unwrap();
        h.analytics.record_confirmed_tx(&log).unwrap();
    }

    let activity = h.store.get_activity(&project.id, "bob@x.io").unwrap().unwrap();
    assert_eq!(activity.transactions_sent, 3);
    assert_eq!(activity.chains_used.len(), 2);
    assert!(activity.engagement_score > 0);

    let top = h.analytics.top_users(&project.id, nexus_core::analytics::TopUsersBy::Transactions, 10).unwrap();
    assert_eq!(top[0].user_identifier, "bob@x.io");
}
