use redb::ReadableTable;

use nexus_common::model::{PaymasterBalance, PaymasterPayment, PaymentStatus, ProjectPaymaster};
use nexus_common::{Chain, NexusError, Result};

use crate::tables::{
    BALANCES, PAYMASTERS, PAYMASTER_BY_PROJECT_CHAIN, PAYMENTS, PAYMENTS_BY_PROJECT,
    PAYMENT_BY_TXHASH,
};
use crate::{db_err, decode, encode, time_key, Store};

fn project_chain_key(project_id: &str, chain: Chain) -> String {
    format!("{}|{}", project_id, chain)
}

/// Receipt fields the poller patches onto a pending payment.
#[derive(Debug, Clone)]
pub struct PaymentPatch {
    pub status: PaymentStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub gas_price: Option<u128>,
    pub amount_wei: Option<u128>,
    pub amount: Option<f64>,
    pub usd_value: Option<f64>,
}

impl Store {
    /// At most one paymaster per (project, chain).
    pub fn insert_paymaster(&self, paymaster: &ProjectPaymaster) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let index_key = project_chain_key(&paymaster.project_id, paymaster.chain);
            let mut index = txn.open_table(PAYMASTER_BY_PROJECT_CHAIN).map_err(db_err)?;
            if index.get(index_key.as_str()).map_err(db_err)?.is_some() {
                return Err(NexusError::conflict(
                    "PAYMASTER_EXISTS",
                    format!("paymaster already provisioned for {} on {}", paymaster.project_id, paymaster.chain),
                ));
            }
            index.insert(index_key.as_str(), paymaster.id.as_str()).map_err(db_err)?;

            let mut paymasters = txn.open_table(PAYMASTERS).map_err(db_err)?;
            paymasters.insert(paymaster.id.as_str(), encode(paymaster)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_paymaster(&self, project_id: &str, chain: Chain) -> Result<Option<ProjectPaymaster>> {
        match self.get_index(PAYMASTER_BY_PROJECT_CHAIN, &project_chain_key(project_id, chain))? {
            Some(id) => self.get_record(PAYMASTERS, &id),
            None => Ok(None),
        }
    }

    pub fn remove_paymaster(&self, project_id: &str, chain: Chain) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let index_key = project_chain_key(project_id, chain);
            let mut index = txn.open_table(PAYMASTER_BY_PROJECT_CHAIN).map_err(db_err)?;
            let id = index.remove(index_key.as_str()).map_err(db_err)?.map(|g| g.value().to_string());
            if let Some(id) = id {
                let mut paymasters = txn.open_table(PAYMASTERS).map_err(db_err)?;
                paymasters.remove(id.as_str()).map_err(db_err)?;
            }
        }
        txn.commit().map_err(db_err)
    }

    pub fn list_project_paymasters(&self, project_id: &str) -> Result<Vec<ProjectPaymaster>> {
        let mut out = Vec::new();
        for chain in Chain::ALL {
            if let Some(pm) = self.get_paymaster(project_id, chain)? {
                out.push(pm);
            }
        }
        Ok(out)
    }

    /// Every paymaster in the system, for the balance refresher sweep.
    pub fn list_all_paymasters(&self) -> Result<Vec<ProjectPaymaster>> {
        let txn = self.db().begin_read().map_err(db_err)?;
        let t = txn.open_table(PAYMASTERS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    pub fn upsert_balance(&self, balance: &PaymasterBalance) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut balances = txn.open_table(BALANCES).map_err(db_err)?;
            balances
                .insert(
                    project_chain_key(&balance.project_id, balance.chain).as_str(),
                    encode(balance)?.as_slice(),
                )
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_balance(&self, project_id: &str, chain: Chain) -> Result<Option<PaymasterBalance>> {
        self.get_record(BALANCES, &project_chain_key(project_id, chain))
    }

    /// Appends a payment row. `tx_hash` is unique across the ledger.
    pub fn insert_payment(&self, payment: &PaymasterPayment) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut by_hash = txn.open_table(PAYMENT_BY_TXHASH).map_err(db_err)?;
            if by_hash.get(payment.tx_hash.as_str()).map_err(db_err)?.is_some() {
                return Err(NexusError::conflict(
                    "DUPLICATE_PAYMENT",
                    format!("payment for tx {} already recorded", payment.tx_hash),
                ));
            }
            by_hash.insert(payment.tx_hash.as_str(), payment.id.as_str()).map_err(db_err)?;

            let mut by_project = txn.open_table(PAYMENTS_BY_PROJECT).map_err(db_err)?;
            by_project
                .insert(
                    time_key(&payment.project_id, payment.created_at, &payment.id).as_str(),
                    payment.id.as_str(),
                )
                .map_err(db_err)?;

            let mut payments = txn.open_table(PAYMENTS).map_err(db_err)?;
            payments.insert(payment.id.as_str(), encode(payment)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_payment(&self, id: &str) -> Result<Option<PaymasterPayment>> {
        self.get_record(PAYMENTS, id)
    }

    pub fn get_payment_by_txhash(&self, tx_hash: &str) -> Result<Option<PaymasterPayment>> {
        match self.get_index(PAYMENT_BY_TXHASH, tx_hash)? {
            Some(id) => self.get_payment(&id),
            None => Ok(None),
        }
    }

    /// Applies receipt fields. Status is monotonic per row: once a payment
    /// is confirmed or failed it never changes again; stale patches are
    /// dropped and the stored row is returned as-is.
    pub fn patch_payment(&self, id: &str, patch: PaymentPatch) -> Result<PaymasterPayment> {
        let txn = self.db().begin_write().map_err(db_err)?;
        let updated = {
            let mut payments = txn.open_table(PAYMENTS).map_err(db_err)?;
            let mut payment: PaymasterPayment = match payments.get(id).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("payment {}", id))),
            };
            if !payment.status.is_terminal() {
                payment.status = patch.status;
                if let Some(block) = patch.block_number {
                    payment.block_number = Some(block);
                }
                if let Some(gas_used) = patch.gas_used {
                    payment.gas_used = Some(gas_used);
                }
                if let Some(gas_price) = patch.gas_price {
                    payment.gas_price = Some(gas_price);
                }
                if let Some(wei) = patch.amount_wei {
                    payment.amount_wei = wei;
                }
                if let Some(amount) = patch.amount {
                    payment.amount = amount;
                }
                if let Some(usd) = patch.usd_value {
                    payment.usd_value = usd;
                }
                payments.insert(id, encode(&payment)?.as_slice()).map_err(db_err)?;
            }
            payment
        };
        txn.commit().map_err(db_err)?;
        Ok(updated)
    }

    pub fn list_payments(
        &self,
        project_id: &str,
        from: Option<chrono::DateTime<chrono::Utc>>,
        to: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<PaymasterPayment>> {
        let ids = self.scan_index(PAYMENTS_BY_PROJECT, project_id, from, to)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.get_payment(&id)? {
                out.push(p);
            }
        }
        Ok(out)
    }
}
