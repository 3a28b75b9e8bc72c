//! Wire-facing shapes. Stored records stay snake_case internally; the API
//! speaks camelCase and never exposes secret material (`encryptedKey`,
//! paymaster private keys, password hashes).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use nexus_common::model::{
    ApiKey, ApiKeyStatus, ApiKeyType, DeployState, PaymasterBalance, PaymasterPayment, Project,
    ProjectMember, ProjectPaymaster, TransactionLog, User, Wallet,
};
use nexus_common::perms::Permission;
use nexus_common::Chain;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub name: String,
    pub company: Option<String>,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            company: user.company.clone(),
            email_verified: user.email_verified,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub owner_id: String,
    pub chains: Vec<Chain>,
    pub paymaster_enabled: bool,
    pub webhook_url: Option<String>,
    pub rate_limit_per_minute: u32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Project> for ProjectDto {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            slug: project.slug.clone(),
            description: project.description.clone(),
            website: project.website.clone(),
            owner_id: project.owner_id.clone(),
            chains: project.chains.clone(),
            paymaster_enabled: project.settings.paymaster_enabled,
            webhook_url: project.settings.webhook_url.clone(),
            rate_limit_per_minute: project.settings.rate_limit_per_minute,
            status: format!("{:?}", project.status).to_lowercase(),
            created_at: project.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub invited_by: String,
    pub invited_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl From<&ProjectMember> for MemberDto {
    fn from(member: &ProjectMember) -> Self {
        Self {
            project_id: member.project_id.clone(),
            user_id: member.user_id.clone(),
            role: format!("{:?}", member.role).to_lowercase(),
            invited_by: member.invited_by.clone(),
            invited_at: member.invited_at,
            accepted_at: member.accepted_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyDto {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// The most identifying information ever returned after creation.
    pub key_preview: String,
    pub key_type: ApiKeyType,
    pub permissions: Vec<Permission>,
    pub ip_allowlist: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ApiKeyStatus,
    pub grace_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyDto {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id.clone(),
            project_id: key.project_id.clone(),
            name: key.name.clone(),
            key_preview: key.key_preview.clone(),
            key_type: key.key_type,
            permissions: key.permissions.clone(),
            ip_allowlist: key.ip_allowlist.iter().map(|e| e.ip.clone()).collect(),
            last_used_at: key.last_used_at,
            usage_count: key.usage_count,
            expires_at: key.expires_at,
            status: key.status,
            grace_until: key.grace_until,
            created_at: key.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDto {
    pub status: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl From<&DeployState> for DeploymentDto {
    fn from(state: &DeployState) -> Self {
        Self {
            status: format!("{:?}", state.status).to_lowercase(),
            tx_hash: state.tx_hash.clone(),
            block_number: state.block_number,
            error: state.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub id: String,
    pub project_id: String,
    pub social_id: String,
    pub social_type: String,
    pub addresses: BTreeMap<Chain, String>,
    /// Counterfactual addresses are returned even before deployment; this
    /// map carries the per-chain deployment state.
    pub deployments: BTreeMap<Chain, DeploymentDto>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_json_text(text: &Option<String>) -> Option<serde_json::Value> {
    text.as_deref().and_then(|t| serde_json::from_str(t).ok())
}

impl From<&Wallet> for WalletDto {
    fn from(wallet: &Wallet) -> Self {
        let mut deployments = BTreeMap::new();
        for chain in wallet.addresses.keys() {
            deployments.insert(*chain, DeploymentDto::from(&wallet.deploy_state(*chain)));
        }
        Self {
            id: wallet.id.clone(),
            project_id: wallet.project_id.clone(),
            social_id: wallet.social_id.clone(),
            social_type: wallet.social_type.clone(),
            addresses: wallet.addresses.clone(),
            deployments,
            metadata: parse_json_text(&wallet.metadata),
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterDto {
    pub id: String,
    pub chain: Chain,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ProjectPaymaster> for PaymasterDto {
    fn from(pm: &ProjectPaymaster) -> Self {
        Self { id: pm.id.clone(), chain: pm.chain, address: pm.address.clone(), created_at: pm.created_at }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDto {
    pub chain: Chain,
    pub address: String,
    pub balance_native: f64,
    pub balance_wei: String,
    pub balance_usd: f64,
    pub token_price_usd: f64,
    pub last_updated: DateTime<Utc>,
}

impl From<&PaymasterBalance> for BalanceDto {
    fn from(balance: &PaymasterBalance) -> Self {
        Self {
            chain: balance.chain,
            address: balance.address.clone(),
            balance_native: balance.balance_native,
            balance_wei: balance.balance_wei.to_string(),
            balance_usd: balance.balance_usd,
            token_price_usd: balance.token_price_usd,
            last_updated: balance.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDto {
    pub id: String,
    pub chain: Chain,
    pub paymaster_address: String,
    pub amount: f64,
    pub amount_wei: String,
    pub gas_for_address: String,
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub usd_value: f64,
    pub operation_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PaymasterPayment> for PaymentDto {
    fn from(payment: &PaymasterPayment) -> Self {
        Self {
            id: payment.id.clone(),
            chain: payment.chain,
            paymaster_address: payment.paymaster_address.clone(),
            amount: payment.amount,
            amount_wei: payment.amount_wei.to_string(),
            gas_for_address: payment.gas_for_address.clone(),
            tx_hash: payment.tx_hash.clone(),
            block_number: payment.block_number,
            usd_value: payment.usd_value,
            operation_type: serde_variant_name(&payment.operation_type),
            status: format!("{:?}", payment.status).to_lowercase(),
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLogDto {
    pub id: String,
    pub transaction_type: String,
    pub chain: Chain,
    pub wallet_address: String,
    pub user_identifier: String,
    pub social_type: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub gas_cost_usd: f64,
    pub currency: String,
    pub paymaster_paid: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<&TransactionLog> for TxLogDto {
    fn from(log: &TransactionLog) -> Self {
        Self {
            id: log.id.clone(),
            transaction_type: log.transaction_type.clone(),
            chain: log.chain,
            wallet_address: log.wallet_address.clone(),
            user_identifier: log.user_identifier.clone(),
            social_type: log.social_type.clone(),
            tx_hash: log.tx_hash.clone(),
            block_number: log.block_number,
            gas_used: log.gas_used,
            gas_cost_usd: log.gas_cost_usd,
            currency: log.currency.clone(),
            paymaster_paid: log.paymaster_paid,
            status: format!("{:?}", log.status).to_lowercase(),
            created_at: log.created_at,
            confirmed_at: log.confirmed_at,
        }
    }
}

fn serde_variant_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}
