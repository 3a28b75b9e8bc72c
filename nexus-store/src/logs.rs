use chrono::{DateTime, Utc};
use redb::ReadableTable;

use nexus_common::model::{ApiKeyUsage, TransactionLog, TransactionStatus, UserActivity};
use nexus_common::{NexusError, Result};

use crate::tables::{
    ACTIVITY, TXLOGS_BY_PROJECT, TXLOGS_BY_USER, TXLOG_BY_TXHASH, TX_LOGS, USAGE, USAGE_BY_KEY,
    USAGE_BY_PROJECT,
};
use crate::{db_err, decode, encode, time_key, Store};

fn activity_key(project_id: &str, user_identifier: &str) -> String {
    format!("{}|{}", project_id, user_identifier)
}

impl Store {
    pub fn insert_tx_log(&self, log: &TransactionLog) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut by_project = txn.open_table(TXLOGS_BY_PROJECT).map_err(db_err)?;
            by_project
                .insert(
                    time_key(&log.project_id, log.created_at, &log.id).as_str(),
                    log.id.as_str(),
                )
                .map_err(db_err)?;

            let mut by_user = txn.open_table(TXLOGS_BY_USER).map_err(db_err)?;
            by_user
                .insert(
                    time_key(
                        &format!("{}|{}", log.project_id, log.user_identifier),
                        log.created_at,
                        &log.id,
                    )
                    .as_str(),
                    log.id.as_str(),
                )
                .map_err(db_err)?;

            if let Some(hash) = &log.tx_hash {
                let mut by_hash = txn.open_table(TXLOG_BY_TXHASH).map_err(db_err)?;
                by_hash.insert(hash.as_str(), log.id.as_str()).map_err(db_err)?;
            }

            let mut logs = txn.open_table(TX_LOGS).map_err(db_err)?;
            logs.insert(log.id.as_str(), encode(log)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_tx_log(&self, id: &str) -> Result<Option<TransactionLog>> {
        self.get_record(TX_LOGS, id)
    }

    pub fn get_tx_log_by_hash(&self, tx_hash: &str) -> Result<Option<TransactionLog>> {
        match self.get_index(TXLOG_BY_TXHASH, tx_hash)? {
            Some(id) => self.get_tx_log(&id),
            None => Ok(None),
        }
    }

    /// Status/receipt patch for a journal row. `pending` is the only state
    /// that accepts changes.
    pub fn settle_tx_log(
        &self,
        id: &str,
        status: TransactionStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
        gas_price: Option<u128>,
        gas_cost_usd: Option<f64>,
        error_message: Option<String>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<TransactionLog> {
        let txn = self.db().begin_write().map_err(db_err)?;
        let updated = {
            let mut logs = txn.open_table(TX_LOGS).map_err(db_err)?;
            let mut log: TransactionLog = match logs.get(id).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("transaction log {}", id))),
            };
            if log.status == TransactionStatus::Pending {
                log.status = status;
                log.block_number = block_number.or(log.block_number);
                log.gas_used = gas_used.or(log.gas_used);
                log.gas_price = gas_price.or(log.gas_price);
                if let Some(usd) = gas_cost_usd {
                    log.gas_cost_usd = usd;
                }
                if let (Some(used), Some(price)) = (log.gas_used, log.gas_price) {
                    log.gas_cost_wei = Some(used as u128 * price);
                }
                log.error_message = error_message.or(log.error_message);
                log.confirmed_at = confirmed_at;
                logs.insert(id, encode(&log)?.as_slice()).map_err(db_err)?;
            }
            log
        };
        txn.commit().map_err(db_err)?;
        Ok(updated)
    }

    pub fn list_tx_logs(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionLog>> {
        let ids = self.scan_index(TXLOGS_BY_PROJECT, project_id, from, to)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(l) = self.get_tx_log(&id)? {
                out.push(l);
            }
        }
        Ok(out)
    }

    pub fn list_tx_logs_for_user(
        &self,
        project_id: &str,
        user_identifier: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionLog>> {
        let scope = format!("{}|{}", project_id, user_identifier);
        let ids = self.scan_index(TXLOGS_BY_USER, &scope, from, to)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(l) = self.get_tx_log(&id)? {
                out.push(l);
            }
        }
        Ok(out)
    }

    pub fn upsert_activity(&self, activity: &UserActivity) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(ACTIVITY).map_err(db_err)?;
            table
                .insert(
                    activity_key(&activity.project_id, &activity.user_identifier).as_str(),
                    encode(activity)?.as_slice(),
                )
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_activity(&self, project_id: &str, user_identifier: &str) -> Result<Option<UserActivity>> {
        self.get_record(ACTIVITY, &activity_key(project_id, user_identifier))
    }

    pub fn list_activity(&self, project_id: &str) -> Result<Vec<UserActivity>> {
        let txn = self.db().begin_read().map_err(db_err)?;
        let t = txn.open_table(ACTIVITY).map_err(db_err)?;
        let start = format!("{}|", project_id);
        let end = format!("{}|~", project_id);
        let mut out = Vec::new();
        for entry in t.range(start.as_str()..=end.as_str()).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    pub fn insert_usage(&self, usage: &ApiKeyUsage) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut by_key = txn.open_table(USAGE_BY_KEY).map_err(db_err)?;
            by_key
                .insert(
                    time_key(&usage.api_key_id, usage.created_at, &usage.usage_id).as_str(),
                    usage.usage_id.as_str(),
                )
                .map_err(db_err)?;
            let mut by_project = txn.open_table(USAGE_BY_PROJECT).map_err(db_err)?;
            by_project
                .insert(
                    time_key(&usage.project_id, usage.created_at, &usage.usage_id).as_str(),
                    usage.usage_id.as_str(),
                )
                .map_err(db_err)?;
            let mut table = txn.open_table(USAGE).map_err(db_err)?;
            table.insert(usage.usage_id.as_str(), encode(usage)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn list_usage_for_key(
        &self,
        api_key_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApiKeyUsage>> {
        let ids = self.scan_index(USAGE_BY_KEY, api_key_id, from, to)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(u) = self.get_record(USAGE, &id)? {
                out.push(u);
            }
        }
        Ok(out)
    }

    pub fn list_usage_for_project(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApiKeyUsage>> {
        let ids = self.scan_index(USAGE_BY_PROJECT, project_id, from, to)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(u) = self.get_record(USAGE, &id)? {
                out.push(u);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nexus_common::Chain;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        (dir, store)
    }

    fn log(id: &str, at: DateTime<Utc>, paymaster_paid: bool) -> TransactionLog {
        TransactionLog {
            id: id.into(),
            project_id: "proj_1".into(),
            transaction_type: "wallet_deployment".into(),
            chain: Chain::Ethereum,
            wallet_address: "0x00000000000000000000000000000000000000cc".into(),
            user_identifier: "bob@x.io".into(),
            social_type: "email".into(),
            tx_hash: Some(format!("0xhash{}", id)),
            block_number: None,
            gas_limit: Some(500_000),
            gas_used: None,
            gas_price: None,
            gas_cost_wei: None,
            gas_cost_usd: 0.0,
            currency: "ETH".into(),
            paymaster_paid,
            paymaster_address: None,
            status: TransactionStatus::Pending,
            error_message: None,
            details: None,
            metadata: None,
            created_at: at,
            confirmed_at: None,
        }
    }

    #[test]
    fn window_scan_filters_by_time() {
        let (_dir, store) = store();
        let now = Utc::now();
        store.insert_tx_log(&log("tx_old", now - Duration::days(10), true)).unwrap();
        store.insert_tx_log(&log("tx_new", now, true)).unwrap();

        let recent = store.list_tx_logs("proj_1", Some(now - Duration::days(1)), None).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "tx_new");

        let all = store.list_tx_logs("proj_1", None, None).unwrap();
        assert_eq!(all.len(), 2);
        // ordered oldest first
        assert_eq!(all[0].id, "tx_old");
    }

    #[test]
    fn settle_is_single_shot() {
        let (_dir, store) = store();
        let now = Utc::now();
        store.insert_tx_log(&log("tx_1", now, true)).unwrap();

        let confirmed = store
            .settle_tx_log(
                "tx_1",
                TransactionStatus::Confirmed,
                Some(77),
                Some(21_000),
                Some(2_000_000_000),
                Some(0.11),
                None,
                Some(now),
            )
            .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Confirmed);
        assert_eq!(confirmed.gas_cost_wei, Some(21_000u128 * 2_000_000_000u128));

        let after = store
            .settle_tx_log("tx_1", TransactionStatus::Failed, None, None, None, None, Some("x".into()), None)
            .unwrap();
        assert_eq!(after.status, TransactionStatus::Confirmed);
    }

    #[test]
    fn lookup_by_hash() {
        let (_dir, store) = store();
        store.insert_tx_log(&log("tx_1", Utc::now(), false)).unwrap();
        assert_eq!(store.get_tx_log_by_hash("0xhashtx_1").unwrap().unwrap().id, "tx_1");
        assert!(store.get_tx_log_by_hash("0xnope").unwrap().is_none());
    }
}
