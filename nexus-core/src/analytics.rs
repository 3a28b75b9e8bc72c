use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use nexus_common::model::{TransactionLog, TransactionStatus, UserActivity};
use nexus_common::{Chain, Result};
use nexus_store::Store;

pub const MAX_TOP_USERS: usize = 100;
pub const ENGAGEMENT_CAP: u32 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct OverviewReport {
    pub days: u32,
    pub total_transactions: u64,
    pub distinct_wallets: u64,
    pub distinct_users: u64,
    pub total_gas_usd: f64,
    pub paymaster_transactions: u64,
    pub paymaster_coverage_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub chain: Chain,
    pub count: u64,
    pub unique_users: u64,
    pub usd_gas: f64,
    pub paymaster_tx: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUser {
    pub user_identifier: String,
    pub transactions_sent: u64,
    pub total_gas_spent_usd: f64,
    pub engagement_score: u32,
    pub preferred_chain: Option<Chain>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortReport {
    pub cohort: String,
    pub total_users: u64,
    pub avg_tx: f64,
    pub avg_gas_usd: f64,
    pub retention_rate_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostRow {
    pub chain: Chain,
    pub transaction_count: u64,
    pub gas_usd: f64,
    pub sponsored_usd: f64,
}

/// How to order the top-users report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopUsersBy {
    Transactions,
    GasSpend,
}

pub struct AnalyticsService {
    store: Arc<Store>,
}

impl AnalyticsService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Folds one confirmed transaction into the per-user rolling counters.
    /// Called by the receipt poller; must be idempotent per log id only in
    /// the sense that each confirmed log is fed exactly once.
    pub fn record_confirmed_tx(&self, log: &TransactionLog) -> Result<UserActivity> {
        let now = log.confirmed_at.unwrap_or_else(Utc::now);
        let mut activity = self
            .store
            .get_activity(&log.project_id, &log.user_identifier)?
            .unwrap_or_else(|| UserActivity::new(&log.project_id, &log.user_identifier, now));

        activity.transactions_sent += 1;
        activity.total_gas_spent_usd += log.gas_cost_usd;
        if log.paymaster_paid {
            activity.paymaster_transactions += 1;
        } else {
            activity.user_paid_transactions += 1;
        }
        if log.transaction_type == crate::wallet::TX_TYPE_WALLET_DEPLOYMENT {
            activity.wallets_created += 1;
        }
        activity.chains_used.insert(log.chain);
        activity.tx_types_used.insert(log.transaction_type.clone());
        activity.preferred_chain = Some(log.chain);

        let last_day = activity.last_active.date_naive();
        let this_day = now.date_naive();
        if this_day == last_day.succ_opt().unwrap_or(last_day) {
            activity.streak_days += 1;
        } else if this_day != last_day {
            activity.streak_days = 1;
        }
        activity.last_active = now;
        if activity.first_active > now {
            activity.first_active = now;
        }
        activity.engagement_score = engagement_score(&activity, now);

        self.store.upsert_activity(&activity)?;
        Ok(activity)
    }

    pub fn overview(&self, project_id: &str, days: u32) -> Result<OverviewReport> {
        let from = Utc::now() - Duration::days(days as i64);
        let logs = self.confirmed_logs(project_id, Some(from), None)?;

        let mut wallets = BTreeSet::new();
        let mut users = BTreeSet::new();
        let mut gas_usd = 0.0;
        let mut sponsored = 0u64;
        for log in &logs {
            wallets.insert(log.wallet_address.clone());
            users.insert(log.user_identifier.clone());
            gas_usd += log.gas_cost_usd;
            if log.paymaster_paid {
                sponsored += 1;
            }
        }

        let total = logs.len() as u64;
        Ok(OverviewReport {
            days,
            total_transactions: total,
            distinct_wallets: wallets.len() as u64,
            distinct_users: users.len() as u64,
            total_gas_usd: gas_usd,
            paymaster_transactions: sponsored,
            paymaster_coverage_pct: if total == 0 {
                0.0
            } else {
                sponsored as f64 / total as f64 * 100.0
            },
        })
    }

    /// `(date, chain)` roll-up over confirmed logs. Pure function of the
    /// journal, so replaying any past window reproduces the same rows.
    pub fn daily_metrics(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        chain: Option<Chain>,
    ) -> Result<Vec<DailyMetric>> {
        let logs = self.confirmed_logs(project_id, from, to)?;
        let mut groups: BTreeMap<(NaiveDate, Chain), (u64, BTreeSet<String>, f64, u64)> =
            BTreeMap::new();
        for log in logs {
            if chain.map(|c| c != log.chain).unwrap_or(false) {
                continue;
            }
            let date = log.confirmed_at.unwrap_or(log.created_at).date_naive();
            let entry = groups.entry((date, log.chain)).or_default();
            entry.0 += 1;
            entry.1.insert(log.user_identifier);
            entry.2 += log.gas_cost_usd;
            if log.paymaster_paid {
                entry.3 += 1;
            }
        }
        Ok(groups
            .into_iter()
            .map(|((date, chain), (count, users, usd, sponsored))| DailyMetric {
                date,
                chain,
                count,
                unique_users: users.len() as u64,
                usd_gas: usd,
                paymaster_tx: sponsored,
            })
            .collect())
    }

    pub fn top_users(&self, project_id: &str, by: TopUsersBy, limit: usize) -> Result<Vec<TopUser>> {
        let mut activity = self.store.list_activity(project_id)?;
        match by {
            TopUsersBy::Transactions => {
                activity.sort_by(|a, b| b.transactions_sent.cmp(&a.transactions_sent))
            }
            TopUsersBy::GasSpend => activity.sort_by(|a, b| {
                b.total_gas_spent_usd
                    .partial_cmp(&a.total_gas_spent_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        Ok(activity
            .into_iter()
            .take(limit.min(MAX_TOP_USERS))
            .map(|a| TopUser {
                user_identifier: a.user_identifier,
                transactions_sent: a.transactions_sent,
                total_gas_spent_usd: a.total_gas_spent_usd,
                engagement_score: a.engagement_score,
                preferred_chain: a.preferred_chain,
            })
            .collect())
    }

    /// 7/30/90-day cohorts keyed on `first_active` age; retention is the
    /// share still active in the trailing seven days.
    pub fn cohorts(&self, project_id: &str) -> Result<Vec<CohortReport>> {
        let now = Utc::now();
        let activity = self.store.list_activity(project_id)?;
        let buckets: [(&str, i64, i64); 3] = [("7d", 0, 7), ("30d", 7, 30), ("90d", 30, 90)];

        let mut out = Vec::with_capacity(buckets.len());
        for (name, min_days, max_days) in buckets {
            let members: Vec<&UserActivity> = activity
                .iter()
                .filter(|a| {
                    let age = now - a.first_active;
                    age >= Duration::days(min_days) && age < Duration::days(max_days)
                })
                .collect();
            let total = members.len() as u64;
            let still_active = members
                .iter()
                .filter(|a| now - a.last_active <= Duration::days(7))
                .count() as u64;
            out.push(CohortReport {
                cohort: name.to_string(),
                total_users: total,
                avg_tx: if total == 0 {
                    0.0
                } else {
                    members.iter().map(|a| a.transactions_sent).sum::<u64>() as f64 / total as f64
                },
                avg_gas_usd: if total == 0 {
                    0.0
                } else {
                    members.iter().map(|a| a.total_gas_spent_usd).sum::<f64>() / total as f64
                },
                retention_rate_pct: if total == 0 {
                    0.0
                } else {
                    still_active as f64 / total as f64 * 100.0
                },
            });
        }
        Ok(out)
    }

    pub fn costs(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<CostRow>> {
        let logs = self.confirmed_logs(project_id, from, to)?;
        let mut rows: BTreeMap<Chain, (u64, f64, f64)> = BTreeMap::new();
        for log in logs {
            let entry = rows.entry(log.chain).or_default();
            entry.0 += 1;
            entry.1 += log.gas_cost_usd;
            if log.paymaster_paid {
                entry.2 += log.gas_cost_usd;
            }
        }
        Ok(rows
            .into_iter()
            .map(|(chain, (count, gas, sponsored))| CostRow {
                chain,
                transaction_count: count,
                gas_usd: gas,
                sponsored_usd: sponsored,
            })
            .collect())
    }

    /// CSV export of confirmed transactions for a billing window.
    pub fn export_csv(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let logs = self.confirmed_logs(project_id, from, to)?;
        let mut csv = String::from(
            "id,created_at,confirmed_at,chain,transaction_type,wallet_address,user_identifier,tx_hash,gas_cost_usd,paymaster_paid,status\n",
        );
        for log in logs {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{:.6},{},confirmed\n",
                log.id,
                log.created_at.to_rfc3339(),
                log.confirmed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                log.chain,
                log.transaction_type,
                log.wallet_address,
                csv_escape(&log.user_identifier),
                log.tx_hash.unwrap_or_default(),
                log.gas_cost_usd,
                log.paymaster_paid,
            ));
        }
        Ok(csv)
    }

    /// Nightly roll-up: recompute a past day's metrics from the raw journal.
    /// Replayable; the same day always yields the same rows.
    pub fn rollup_day(&self, project_id: &str, day: NaiveDate) -> Result<Vec<DailyMetric>> {
        let from = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        let to = day
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc());
        self.daily_metrics(project_id, from, to, None)
    }

    fn confirmed_logs(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionLog>> {
        let mut logs = self.store.list_tx_logs(project_id, from, to)?;
        logs.retain(|l| l.status == TransactionStatus::Confirmed);
        Ok(logs)
    }
}

/// `2·tx + 5·walletsCreated + 10·|chainsUsed| + 3·|txTypes| + recencyBonus
/// + min(2·streakDays, 50)`, capped at 1000.
pub fn engagement_score(activity: &UserActivity, now: DateTime<Utc>) -> u32 {
    let idle = now - activity.last_active;
    let recency = if idle <= Duration::days(1) {
        20
    } else if idle <= Duration::days(7) {
        10
    } else if idle <= Duration::days(30) {
        5
    } else {
        0
    };
    let score = 2 * activity.transactions_sent
        + 5 * activity.wallets_created
        + 10 * activity.chains_used.len() as u64
        + 3 * activity.tx_types_used.len() as u64
        + recency
        + (2 * activity.streak_days as u64).min(50);
    score.min(ENGAGEMENT_CAP as u64) as u32
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
