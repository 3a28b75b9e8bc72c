//! Embedded system-of-record for the control plane. One redb database,
//! explicit secondary-index tables, bincode record values. Writes are short
//! single transactions; conditional state transitions happen inside one
//! write transaction so observers never see a torn update.

pub mod keys;
pub mod logs;
pub mod paymasters;
pub mod projects;
pub mod tables;
pub mod users;
pub mod wallets;

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;

use nexus_common::{NexusError, Result};

pub use wallets::DeployBegin;

pub struct Store {
    db: Database,
}

pub(crate) fn db_err<E: std::fmt::Display>(e: E) -> NexusError {
    NexusError::Storage(e.to_string())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(db_err)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(db_err)
}

/// Index key ordered by creation time within a parent scope:
/// `{scope}|{millis:020}|{id}`.
pub(crate) fn time_key(scope: &str, at: DateTime<Utc>, id: &str) -> String {
    format!("{}|{:020}|{}", scope, at.timestamp_millis().max(0), id)
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let store = Self { db };
        store.migrate()?;
        Ok(store)
    }

    /// Creates every table. Idempotent; also what `--migrate` runs.
    pub fn migrate(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            txn.open_table(tables::USERS).map_err(db_err)?;
            txn.open_table(tables::PROJECTS).map_err(db_err)?;
            txn.open_table(tables::MEMBERS).map_err(db_err)?;
            txn.open_table(tables::API_KEYS).map_err(db_err)?;
            txn.open_table(tables::PAYMASTERS).map_err(db_err)?;
            txn.open_table(tables::BALANCES).map_err(db_err)?;
            txn.open_table(tables::PAYMENTS).map_err(db_err)?;
            txn.open_table(tables::WALLETS).map_err(db_err)?;
            txn.open_table(tables::TX_LOGS).map_err(db_err)?;
            txn.open_table(tables::ACTIVITY).map_err(db_err)?;
            txn.open_table(tables::USAGE).map_err(db_err)?;
            txn.open_table(tables::USERS_BY_EMAIL).map_err(db_err)?;
            txn.open_table(tables::USERS_BY_OAUTH).map_err(db_err)?;
            txn.open_table(tables::USERS_BY_TOKEN).map_err(db_err)?;
            txn.open_table(tables::PROJECTS_BY_SLUG).map_err(db_err)?;
            txn.open_table(tables::PROJECTS_BY_OWNER).map_err(db_err)?;
            txn.open_table(tables::MEMBERS_BY_USER).map_err(db_err)?;
            txn.open_table(tables::API_KEYS_BY_PROJECT).map_err(db_err)?;
            txn.open_table(tables::API_KEY_LOOKUP).map_err(db_err)?;
            txn.open_table(tables::PAYMASTER_BY_PROJECT_CHAIN).map_err(db_err)?;
            txn.open_table(tables::PAYMENT_BY_TXHASH).map_err(db_err)?;
            txn.open_table(tables::PAYMENTS_BY_PROJECT).map_err(db_err)?;
            txn.open_table(tables::WALLET_BY_SOCIAL).map_err(db_err)?;
            txn.open_table(tables::WALLETS_BY_PROJECT).map_err(db_err)?;
            txn.open_table(tables::TXLOG_BY_TXHASH).map_err(db_err)?;
            txn.open_table(tables::TXLOGS_BY_PROJECT).map_err(db_err)?;
            txn.open_table(tables::TXLOGS_BY_USER).map_err(db_err)?;
            txn.open_table(tables::USAGE_BY_KEY).map_err(db_err)?;
            txn.open_table(tables::USAGE_BY_PROJECT).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Fetch a bincode record from a primary table.
    pub(crate) fn get_record<T: DeserializeOwned>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        id: &str,
    ) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let t = txn.open_table(table).map_err(db_err)?;
        let result = match t.get(id).map_err(db_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        };
        result
    }

    /// Resolve an index entry to its id.
    pub(crate) fn get_index(
        &self,
        table: redb::TableDefinition<&str, &str>,
        key: &str,
    ) -> Result<Option<String>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let t = txn.open_table(table).map_err(db_err)?;
        let result = Ok(t.get(key).map_err(db_err)?.map(|g| g.value().to_string()));
        result
    }

    /// Ids under an index prefix, in key order, optionally bounded by a
    /// `[from, to]` timestamp window for time-ordered indexes.
    pub(crate) fn scan_index(
        &self,
        table: redb::TableDefinition<&str, &str>,
        scope: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let start = match from {
            Some(at) => format!("{}|{:020}", scope, at.timestamp_millis().max(0)),
            None => format!("{}|", scope),
        };
        // '~' sorts above every character the key space uses.
        let end = match to {
            Some(at) => format!("{}|{:020}~", scope, at.timestamp_millis().max(0)),
            None => format!("{}|~", scope),
        };

        let txn = self.db.begin_read().map_err(db_err)?;
        let t = txn.open_table(table).map_err(db_err)?;
        let mut ids = Vec::new();
        for entry in t.range(start.as_str()..=end.as_str()).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            ids.push(v.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        // second migrate is a no-op
        store.migrate().unwrap();
    }

    #[test]
    fn time_keys_sort_chronologically() {
        let early = time_key("proj_1", Utc::now(), "tx_a");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let late = time_key("proj_1", Utc::now(), "tx_b");
        assert!(early < late);
    }
}
