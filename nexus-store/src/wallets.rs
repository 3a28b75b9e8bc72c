use chrono::{DateTime, Utc};
use redb::ReadableTable;

use nexus_common::model::{DeployState, DeployStatus, Wallet};
use nexus_common::{Chain, NexusError, Result};

use crate::tables::{WALLETS, WALLETS_BY_PROJECT, WALLET_BY_SOCIAL};
use crate::{db_err, decode, encode, time_key, Store};

fn social_key(project_id: &str, social_id: &str, social_type: &str) -> String {
    format!("{}|{}|{}", project_id, social_type, social_id)
}

/// Outcome of the conditional `undeployed|failed → pending` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployBegin {
    /// The caller won the transition and owns the submission.
    Started,
    /// Another deploy is in flight; its tx hash, when already submitted.
    AlreadyPending(Option<String>),
    AlreadyDeployed,
}

impl Store {
    /// Inserts a wallet unless the social mapping already exists, in which
    /// case the existing record comes back; `createWallet` is idempotent.
    pub fn insert_wallet(&self, wallet: &Wallet) -> Result<Wallet> {
        let txn = self.db().begin_write().map_err(db_err)?;
        let stored = {
            let key = social_key(&wallet.project_id, &wallet.social_id, &wallet.social_type);
            let mut by_social = txn.open_table(WALLET_BY_SOCIAL).map_err(db_err)?;
            let existing = by_social.get(key.as_str()).map_err(db_err)?.map(|g| g.value().to_string());

            match existing {
                Some(existing_id) => {
                    let wallets = txn.open_table(WALLETS).map_err(db_err)?;
                    let guard = wallets
                        .get(existing_id.as_str())
                        .map_err(db_err)?
                        .ok_or_else(|| NexusError::Storage("dangling wallet index".into()))?;
                    decode::<Wallet>(guard.value())?
                }
                None => {
                    by_social.insert(key.as_str(), wallet.id.as_str()).map_err(db_err)?;
                    let mut by_project = txn.open_table(WALLETS_BY_PROJECT).map_err(db_err)?;
                    by_project
                        .insert(
                            time_key(&wallet.project_id, wallet.created_at, &wallet.id).as_str(),
                            wallet.id.as_str(),
                        )
                        .map_err(db_err)?;
                    let mut wallets = txn.open_table(WALLETS).map_err(db_err)?;
                    wallets.insert(wallet.id.as_str(), encode(wallet)?.as_slice()).map_err(db_err)?;
                    wallet.clone()
                }
            }
        };
        txn.commit().map_err(db_err)?;
        Ok(stored)
    }

    pub fn get_wallet(&self, id: &str) -> Result<Option<Wallet>> {
        self.get_record(WALLETS, id)
    }

    pub fn get_wallet_by_social(
        &self,
        project_id: &str,
        social_id: &str,
        social_type: &str,
    ) -> Result<Option<Wallet>> {
        match self.get_index(WALLET_BY_SOCIAL, &social_key(project_id, social_id, social_type))? {
            Some(id) => self.get_wallet(&id),
            None => Ok(None),
        }
    }

    pub fn update_wallet(&self, wallet: &Wallet) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut wallets = txn.open_table(WALLETS).map_err(db_err)?;
            wallets.insert(wallet.id.as_str(), encode(wallet)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    /// Every wallet with a deploy still in flight, for poller recovery
    /// after a restart.
    pub fn list_pending_deploys(&self) -> Result<Vec<(Wallet, Chain)>> {
        let txn = self.db().begin_read().map_err(db_err)?;
        let t = txn.open_table(WALLETS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let wallet: Wallet = decode(v.value())?;
            for (chain, state) in &wallet.deployments {
                if state.status == DeployStatus::Pending {
                    out.push((wallet.clone(), *chain));
                }
            }
        }
        Ok(out)
    }

    pub fn list_wallets(&self, project_id: &str) -> Result<Vec<Wallet>> {
        let ids = self.scan_index(WALLETS_BY_PROJECT, project_id, None, None)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(w) = self.get_wallet(&id)? {
                out.push(w);
            }
        }
        Ok(out)
    }

    /// Conditional transition enforcing at most one concurrent deploy per
    /// (wallet, chain). Runs read-check-write inside a single write
    /// transaction so concurrent callers serialize on the commit.
    pub fn begin_wallet_deploy(
        &self,
        wallet_id: &str,
        chain: Chain,
        now: DateTime<Utc>,
    ) -> Result<DeployBegin> {
        let txn = self.db().begin_write().map_err(db_err)?;
        let outcome = {
            let mut wallets = txn.open_table(WALLETS).map_err(db_err)?;
            let mut wallet: Wallet = match wallets.get(wallet_id).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("wallet {}", wallet_id))),
            };
            let state = wallet.deploy_state(chain);
            match state.status {
                DeployStatus::Deployed => DeployBegin::AlreadyDeployed,
                DeployStatus::Pending => DeployBegin::AlreadyPending(state.tx_hash),
                DeployStatus::Undeployed | DeployStatus::Failed => {
                    wallet.deployments.insert(
                        chain,
                        DeployState {
                            status: DeployStatus::Pending,
                            tx_hash: None,
                            block_number: None,
                            error: None,
                            started_at: Some(now),
                        },
                    );
                    wallet.updated_at = now;
                    wallets.insert(wallet_id, encode(&wallet)?.as_slice()).map_err(db_err)?;
                    DeployBegin::Started
                }
            }
        };
        txn.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// Attaches the submitted tx hash to an in-flight deploy.
    pub fn set_deploy_tx(&self, wallet_id: &str, chain: Chain, tx_hash: &str) -> Result<()> {
        self.mutate_deploy(wallet_id, chain, |state| {
            if state.status == DeployStatus::Pending {
                state.tx_hash = Some(tx_hash.to_string());
            }
        })
    }

    /// Terminal transition from `pending`. Late or duplicate completions
    /// are ignored; `deployed` never regresses.
    pub fn complete_wallet_deploy(
        &self,
        wallet_id: &str,
        chain: Chain,
        status: DeployStatus,
        block_number: Option<u64>,
        error: Option<String>,
    ) -> Result<Wallet> {
        debug_assert!(matches!(status, DeployStatus::Deployed | DeployStatus::Failed));
        let txn = self.db().begin_write().map_err(db_err)?;
        let updated = {
            let mut wallets = txn.open_table(WALLETS).map_err(db_err)?;
            let mut wallet: Wallet = match wallets.get(wallet_id).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("wallet {}", wallet_id))),
            };
            let mut state = wallet.deploy_state(chain);
            if state.status == DeployStatus::Pending {
                state.status = status;
                state.block_number = block_number;
                state.error = error;
                wallet.deployments.insert(chain, state);
                wallet.updated_at = Utc::now();
                wallets.insert(wallet_id, encode(&wallet)?.as_slice()).map_err(db_err)?;
            }
            wallet
        };
        txn.commit().map_err(db_err)?;
        Ok(updated)
    }

    fn mutate_deploy(
        &self,
        wallet_id: &str,
        chain: Chain,
        f: impl FnOnce(&mut DeployState),
    ) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut wallets = txn.open_table(WALLETS).map_err(db_err)?;
            let mut wallet: Wallet = match wallets.get(wallet_id).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("wallet {}", wallet_id))),
            };
            let mut state = wallet.deploy_state(chain);
            f(&mut state);
            wallet.deployments.insert(chain, state);
            wallets.insert(wallet_id, encode(&wallet)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        (dir, store)
    }

    fn wallet(id: &str, social: &str) -> Wallet {
        let mut addresses = BTreeMap::new();
        addresses.insert(Chain::Ethereum, "0x00000000000000000000000000000000000000cc".to_string());
        Wallet {
            id: id.into(),
            project_id: "proj_1".into(),
            social_id: social.into(),
            social_type: "email".into(),
            addresses,
            deployments: BTreeMap::new(),
            metadata: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn social_mapping_is_idempotent() {
        let (_dir, store) = store();
        let first = store.insert_wallet(&wallet("wal_1", "bob@x.io")).unwrap();
        let second = store.insert_wallet(&wallet("wal_2", "bob@x.io")).unwrap();
        assert_eq!(first.id, "wal_1");
        assert_eq!(second.id, "wal_1");
        assert_eq!(store.list_wallets("proj_1").unwrap().len(), 1);
    }

    #[test]
    fn deploy_transition_gate() {
        let (_dir, store) = store();
        store.insert_wallet(&wallet("wal_1", "bob@x.io")).unwrap();
        let now = Utc::now();

        assert_eq!(store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap(), DeployBegin::Started);
        store.set_deploy_tx("wal_1", Chain::Ethereum, "0xT").unwrap();

        // second caller observes the pending deploy and its hash
        assert_eq!(
            store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap(),
            DeployBegin::AlreadyPending(Some("0xT".into()))
        );

        let w = store
            .complete_wallet_deploy("wal_1", Chain::Ethereum, DeployStatus::Deployed, Some(42), None)
            .unwrap();
        assert_eq!(w.deploy_state(Chain::Ethereum).status, DeployStatus::Deployed);

        assert_eq!(
            store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap(),
            DeployBegin::AlreadyDeployed
        );
    }

    #[test]
    fn failed_deploy_can_be_retried() {
        let (_dir, store) = store();
        store.insert_wallet(&wallet("wal_1", "bob@x.io")).unwrap();
        let now = Utc::now();

        store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap();
        store
            .complete_wallet_deploy(
                "wal_1",
                Chain::Ethereum,
                DeployStatus::Failed,
                None,
                Some("reverted".into()),
            )
            .unwrap();

        assert_eq!(store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap(), DeployBegin::Started);
    }

    #[test]
    fn late_completion_does_not_regress_deployed() {
        let (_dir, store) = store();
        store.insert_wallet(&wallet("wal_1", "bob@x.io")).unwrap();
        let now = Utc::now();

        store.begin_wallet_deploy("wal_1", Chain::Ethereum, now).unwrap();
        store.complete_wallet_deploy("wal_1", Chain::Ethereum, DeployStatus::Deployed, Some(1), None).unwrap();
        let w = store
            .complete_wallet_deploy("wal_1", Chain::Ethereum, DeployStatus::Failed, None, Some("late".into()))
            .unwrap();
        assert_eq!(w.deploy_state(Chain::Ethereum).status, DeployStatus::Deployed);
    }
}
